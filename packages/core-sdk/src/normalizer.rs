use serde_json::{Map, Value};

use crate::{error::GatewayError, models::NormalizedRequest};

/**
 * \brief Known inbound payload shapes, picked by the payload's `application` tag.
 * \details Each dialect owns exactly one rule producing a `NormalizedRequest`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDialect {
    /** \brief `messages` array; every `content` joined by newlines. */
    AnythingLlm,
    /**
     * \brief `messages` array; only `messages[0].content` is read and the model
     * is always left to the active provider.
     */
    Pythagora,
    /** \brief `message` or `query` plus an optional `model`. */
    Generic,
}

impl ClientDialect {
    /**
     * \brief Unknown or missing tags fall back to `Generic`.
     */
    pub fn from_application(application: Option<&str>) -> Self {
        match application {
            Some("AnythingLLM") => ClientDialect::AnythingLlm,
            Some("Pythagora") => ClientDialect::Pythagora,
            _ => ClientDialect::Generic,
        }
    }

    pub fn detect(payload: &Map<String, Value>) -> Self {
        Self::from_application(payload.get("application").and_then(Value::as_str))
    }

    fn normalize(self, payload: &Map<String, Value>) -> Result<NormalizedRequest, GatewayError> {
        match self {
            ClientDialect::AnythingLlm => {
                let prompt = messages(payload, self)?
                    .iter()
                    .map(content_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(NormalizedRequest {
                    prompt,
                    model: None,
                })
            }
            ClientDialect::Pythagora => {
                let first = messages(payload, self)?[0]
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::InvalidRequestShape(
                            "messages[0] has no text content".into(),
                        )
                    })?;
                Ok(NormalizedRequest {
                    prompt: first.to_string(),
                    model: None,
                })
            }
            ClientDialect::Generic => {
                let prompt = non_empty_str(payload, "message")
                    .or_else(|| non_empty_str(payload, "query"))
                    .unwrap_or_default();
                Ok(NormalizedRequest {
                    prompt: prompt.to_string(),
                    model: non_empty_str(payload, "model").map(str::to_string),
                })
            }
        }
    }
}

/**
 * \brief Validates the minimal shape and applies the payload's dialect rule.
 * \details Pure: the same payload always yields the same request.
 */
pub fn normalize(payload: &Value) -> Result<NormalizedRequest, GatewayError> {
    let object = validate_shape(payload)?;
    let dialect = ClientDialect::detect(object);
    let request = dialect.normalize(object)?;
    tracing::debug!(
        ?dialect,
        prompt_len = request.prompt.len(),
        model = request.model.as_deref().unwrap_or("<provider default>"),
        "normalized request"
    );
    Ok(request)
}

/**
 * \brief Payload must be an object holding a message, a query, or a non-empty
 * messages array.
 */
pub fn validate_shape(payload: &Value) -> Result<&Map<String, Value>, GatewayError> {
    let Some(object) = payload.as_object() else {
        return Err(GatewayError::InvalidRequestShape(
            "request body must be a JSON object".into(),
        ));
    };
    let has_messages = object
        .get("messages")
        .and_then(Value::as_array)
        .is_some_and(|m| !m.is_empty());
    if non_empty_str(object, "message").is_some()
        || non_empty_str(object, "query").is_some()
        || has_messages
    {
        Ok(object)
    } else {
        tracing::warn!(
            fields = ?object.keys().collect::<Vec<_>>(),
            "request has no message, query or messages"
        );
        Err(GatewayError::InvalidRequestShape(
            "expected a message, a query or a non-empty messages array".into(),
        ))
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn messages(object: &Map<String, Value>, dialect: ClientDialect) -> Result<&[Value], GatewayError> {
    object
        .get("messages")
        .and_then(Value::as_array)
        .filter(|m| !m.is_empty())
        .map(Vec::as_slice)
        .ok_or_else(|| {
            GatewayError::InvalidRequestShape(format!(
                "{:?} requests need a non-empty messages array",
                dialect
            ))
        })
}

/* null or missing content is an empty line; other scalars keep their JSON text */
fn content_text(message: &Value) -> String {
    match message.get("content") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
