use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;

use crate::{
    db::ProviderStore,
    error::GatewayError,
    gateway::{ForwardMode, ForwardingGateway, UpstreamResponse},
    normalizer,
    selector::ActiveProviderSelector,
};

/**
 * \brief Single entry point for chat-completion traffic.
 * \details validate -> normalize -> resolve provider -> forward. Never writes
 * to the store and never retries.
 */
#[derive(Clone)]
pub struct GatewayFacade {
    selector: ActiveProviderSelector,
    gateway: ForwardingGateway,
}

impl GatewayFacade {
    pub fn new(selector: ActiveProviderSelector, gateway: ForwardingGateway) -> Self {
        Self { selector, gateway }
    }

    pub fn from_store(store: Arc<dyn ProviderStore>, gateway: ForwardingGateway) -> Self {
        Self::new(ActiveProviderSelector::new(store), gateway)
    }

    pub fn selector(&self) -> &ActiveProviderSelector {
        &self.selector
    }

    /**
     * \brief Transparent proxy path: keeps the inbound method and headers.
     */
    pub async fn handle(
        &self,
        payload: &Value,
        headers: &HeaderMap,
        method: Method,
    ) -> Result<UpstreamResponse, GatewayError> {
        self.dispatch(
            payload,
            ForwardMode::Proxy {
                method,
                headers: headers.clone(),
            },
        )
        .await
    }

    /**
     * \brief Canonical chat-completion path: always POST with `max_tokens`.
     */
    pub async fn complete(&self, payload: &Value) -> Result<UpstreamResponse, GatewayError> {
        self.dispatch(payload, ForwardMode::Completion).await
    }

    async fn dispatch(
        &self,
        payload: &Value,
        mode: ForwardMode,
    ) -> Result<UpstreamResponse, GatewayError> {
        let request = normalizer::normalize(payload)?;
        let Some(provider) = self.selector.get_active()? else {
            tracing::warn!("No active LLM entry found");
            return Err(GatewayError::NoActiveProvider);
        };
        self.gateway.forward(&provider, &request, mode).await
    }
}
