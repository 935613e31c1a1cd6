use axum::body::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION,
    CONTENT_LENGTH, CONTENT_TYPE, HOST, PROXY_AUTHORIZATION, TE, TRANSFER_ENCODING, UPGRADE,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use url::Url;

use crate::{
    config::GatewayConfig,
    error::{ErrorKind, GatewayError},
    models::{NormalizedRequest, ProviderEntry},
};

/** \brief Connection-scoped headers that never travel upstream. */
const STRIPPED_HEADERS: [HeaderName; 7] = [
    HOST,
    CONTENT_LENGTH,
    CONNECTION,
    TRANSFER_ENCODING,
    TE,
    UPGRADE,
    PROXY_AUTHORIZATION,
];

/**
 * \brief How the upstream call is shaped.
 */
#[derive(Debug, Clone)]
pub enum ForwardMode {
    /** \brief Transparent proxying: inbound method and (sanitized) headers are kept. */
    Proxy { method: Method, headers: HeaderMap },
    /** \brief Canonical chat completion: POST with the configured `max_tokens`. */
    Completion,
}

/**
 * \brief Upstream answer relayed to the caller untouched.
 */
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl UpstreamResponse {
    /**
     * \brief `Some(UpstreamError)` for non-2xx answers.
     */
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.status.is_success() {
            None
        } else {
            Some(ErrorKind::UpstreamError)
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct UpstreamBody<'a> {
    prompt: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/**
 * \brief Sends normalized requests to the active provider and classifies the result.
 */
#[derive(Clone)]
pub struct ForwardingGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl ForwardingGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client setup failed: {}", e)))?;
        Ok(Self { client, config })
    }

    /**
     * \brief Performs the upstream call.
     * \details Dropping the returned future (caller disconnected) drops the
     * in-flight reqwest request with it.
     */
    pub async fn forward(
        &self,
        provider: &ProviderEntry,
        request: &NormalizedRequest,
        mode: ForwardMode,
    ) -> Result<UpstreamResponse, GatewayError> {
        let target = parse_target(&provider.base_url)?;
        let (method, inbound, max_tokens) = match mode {
            ForwardMode::Proxy { method, headers } => (method, headers, None),
            ForwardMode::Completion => (
                Method::POST,
                HeaderMap::new(),
                Some(self.config.completion_max_tokens),
            ),
        };
        let headers = outbound_headers(&inbound, &provider.api_key)?;
        let body = UpstreamBody {
            prompt: &request.prompt,
            model: request.model.as_deref().unwrap_or(&provider.model),
            max_tokens,
        };

        tracing::info!(
            provider_id = provider.id,
            %method,
            target = %redacted_target(&target),
            "proxying request"
        );
        tracing::debug!(
            headers = ?headers.keys().map(HeaderName::as_str).collect::<Vec<_>>(),
            "outbound header names"
        );

        let resp = self
            .client
            .request(method, target)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let body = resp.bytes().await.map_err(|e| {
            tracing::error!(provider_id = provider.id, %status, error = %e, "upstream body read failed");
            GatewayError::UpstreamUnreachable(transport_reason(&e).to_string())
        })?;

        if status.is_success() {
            tracing::info!(provider_id = provider.id, %status, bytes = body.len(), "upstream responded");
        } else {
            tracing::warn!(
                provider_id = provider.id,
                %status,
                body = %String::from_utf8_lossy(&body),
                "upstream returned an error status"
            );
        }

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

fn parse_target(base_url: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(base_url)
        .map_err(|e| GatewayError::Internal(format!("provider base URL is invalid: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::Internal(format!(
            "provider base URL has unsupported scheme '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

fn redacted_target(url: &Url) -> String {
    let mut shown = url.clone();
    let _ = shown.set_password(None);
    let _ = shown.set_username("");
    shown.set_query(None);
    shown.to_string()
}

/**
 * \brief Inbound headers minus connection-scoped ones, with a JSON content type
 * and the provider bearer token.
 */
pub fn outbound_headers(inbound: &HeaderMap, api_key: &str) -> Result<HeaderMap, GatewayError> {
    let mut headers = inbound.clone();
    for name in STRIPPED_HEADERS.iter() {
        headers.remove(name);
    }
    // relayed bodies are passed through without their content-encoding header
    headers.remove(ACCEPT_ENCODING);
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    // the forwarded body is always the JSON upstream shape
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
        GatewayError::Internal("provider api key is not a valid header value".into())
    })?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

fn classify_send_error(err: &reqwest::Error) -> GatewayError {
    if err.is_builder() {
        tracing::error!(error = %err, "failed to build upstream request");
        return GatewayError::Internal("failed to build upstream request".into());
    }
    tracing::error!(error = %err, "proxy request failed");
    GatewayError::UpstreamUnreachable(transport_reason(err).to_string())
}

fn transport_reason(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "upstream timed out"
    } else if err.is_connect() {
        "could not connect to upstream"
    } else {
        "no response from upstream"
    }
}
