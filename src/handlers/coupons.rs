use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{coupon, user_coupon},
    errors::ServiceError,
    services::coupons::{CreateCouponRequest, UserCouponView},
    ApiResponse, AppState,
};

pub async fn create_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ServiceError> {
    let coupon = state
        .services
        .coupons
        .create_coupon(auth_user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(coupon))))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(coupon_id): Path<Uuid>,
) -> Result<Json<ApiResponse<coupon::Model>>, ServiceError> {
    let coupon = state.services.coupons.get_coupon(coupon_id).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

/// First come, first served; a user holds at most one copy.
pub async fn issue_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(coupon_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<user_coupon::Model>>), ServiceError> {
    let issued = state
        .services
        .coupons
        .issue(auth_user.user_id, coupon_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(issued))))
}

pub async fn list_my_coupons(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<UserCouponView>>>, ServiceError> {
    let coupons = state
        .services
        .coupons
        .list_user_coupons(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(coupons)))
}
