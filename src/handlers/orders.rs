use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    models::OrderIdentifier,
    payments::ApprovalTokens,
    services::orders::{CreateOrderRequest, OrderDetail, OrderResponse},
    ApiResponse, AppState,
};

/// Starts checkout; the response carries the provider redirect.
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let response = state
        .services
        .orders
        .create_order(auth_user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderDetail>>>, ServiceError> {
    let orders = state.services.orders.list_orders(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Accepts either the order UUID or the `ORDER_<uuid>` merchant token.
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let identifier: OrderIdentifier = id.parse()?;
    let order = state
        .services
        .orders
        .get_order(auth_user.user_id, identifier.0)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Provider return URL lands here with the approval tokens.
pub async fn approve_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<String>,
    Json(tokens): Json<ApprovalTokens>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let identifier: OrderIdentifier = id.parse()?;
    let order = state
        .services
        .orders
        .approve_order(identifier, tokens, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let identifier: OrderIdentifier = id.parse()?;
    let order = state
        .services
        .orders
        .cancel_order(auth_user.user_id, identifier.0)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn mark_review_written(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_item_id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .orders
        .mark_review_written(auth_user.user_id, order_item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
