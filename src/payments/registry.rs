use super::{GatewayError, KakaoPayGateway, NaverPayGateway, PaymentGateway, TossPayGateway};
use crate::config::PaymentsConfig;
use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Dispatch table from payment method to adapter, built once at startup.
#[derive(Clone, Default)]
pub struct PaymentGatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGatewayRegistry {
    /// Later adapters for the same method replace earlier ones.
    pub fn new(gateways: impl IntoIterator<Item = Arc<dyn PaymentGateway>>) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.payment_method(), gateway))
            .collect();
        Self { gateways }
    }

    /// Registers an adapter for every provider section present in `config`.
    pub fn from_config(config: &PaymentsConfig) -> Result<Self, GatewayError> {
        let timeout = config.gateway_timeout();
        let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();

        if let Some(kakao) = &config.kakao {
            gateways.push(Arc::new(KakaoPayGateway::new(kakao.clone(), timeout)?));
        }
        if let Some(naver) = &config.naver {
            gateways.push(Arc::new(NaverPayGateway::new(naver.clone(), timeout)?));
        }
        if let Some(toss) = &config.toss {
            gateways.push(Arc::new(TossPayGateway::new(toss.clone(), timeout)?));
        }

        let registry = Self::new(gateways);
        if registry.gateways.is_empty() {
            warn!("No payment providers configured; every checkout will be rejected");
        } else {
            info!(methods = ?registry.methods(), "Payment providers registered");
        }
        Ok(registry)
    }

    /// Unknown methods are a configuration error.
    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways
            .get(&method)
            .cloned()
            .ok_or_else(|| ServiceError::UnsupportedPaymentMethod(method.to_string()))
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.gateways.keys().copied().collect();
        methods.sort_by_key(|m| m.to_string());
        methods
    }
}
