use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/**
 * \brief Stable classification of a gateway outcome.
 * \details Callers branch on the snake_case `code()` rather than on message text.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequestShape,
    NoActiveProvider,
    UpstreamUnreachable,
    /** \brief Upstream answered non-2xx; relayed verbatim, never rendered by the gateway. */
    UpstreamError,
    GatewayInternalError,
    ActivationConflict,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequestShape => "invalid_request_shape",
            ErrorKind::NoActiveProvider => "no_active_provider",
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::GatewayInternalError => "gateway_internal_error",
            ErrorKind::ActivationConflict => "activation_conflict",
        }
    }
}

/**
 * \brief Failures the gateway itself originates; rendered as `{"error":{"kind","message"}}`.
 */
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request structure: {0}")]
    InvalidRequestShape(String),

    #[error("no active LLM entry found")]
    NoActiveProvider,

    #[error("failed to forward request to the target LLM: {0}")]
    UpstreamUnreachable(String),

    #[error("gateway internal error: {0}")]
    Internal(String),

    #[error("activation failed: {0}")]
    ActivationConflict(String),

    #[error("provider store failure: {0}")]
    Store(#[source] anyhow::Error),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidRequestShape(_) => ErrorKind::InvalidRequestShape,
            GatewayError::NoActiveProvider => ErrorKind::NoActiveProvider,
            GatewayError::UpstreamUnreachable(_) => ErrorKind::UpstreamUnreachable,
            GatewayError::Internal(_) | GatewayError::Store(_) => ErrorKind::GatewayInternalError,
            GatewayError::ActivationConflict(_) => ErrorKind::ActivationConflict,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidRequestShape => StatusCode::BAD_REQUEST,
            ErrorKind::NoActiveProvider => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            ErrorKind::ActivationConflict => StatusCode::CONFLICT,
            ErrorKind::UpstreamError | ErrorKind::GatewayInternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Store(err)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind().code(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
