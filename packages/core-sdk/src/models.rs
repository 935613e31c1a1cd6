use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/**
 * \brief Stored upstream provider configuration.
 * \details `api_key` is a secret: `Debug` redacts it and the serialized form
 * only ever carries a masked copy.
 */
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ProviderEntry {
    /** \brief Store-assigned primary key. */
    pub id: i64,
    /** \brief Absolute URL requests are forwarded to. */
    pub base_url: String,
    /** \brief Credential sent as a bearer token. */
    #[serde(serialize_with = "serialize_masked")]
    pub api_key: String,
    /** \brief Model identifier used when the caller does not override it. */
    pub model: String,
    /** \brief Optional display name. */
    pub label: Option<String>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

impl ProviderEntry {
    /**
     * \brief Credential with everything but the last four characters hidden.
     */
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("label", &self.label)
            .field("is_active", &self.is_active)
            .finish()
    }
}

fn serialize_masked<S: serde::Serializer>(key: &str, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&mask_secret(key))
}

/**
 * \brief Short secrets are hidden entirely; longer ones keep a four character tail.
 */
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/**
 * \brief Writable provider fields, used by both add and edit.
 */
#[derive(Clone, Deserialize)]
pub struct NewProvider {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl fmt::Debug for NewProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("label", &self.label)
            .finish()
    }
}

/**
 * \brief A single rejected field from provider validation.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl NewProvider {
    /**
     * \brief Checks the write-time invariants: non-empty model and key, absolute http(s) URL.
     */
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.model.trim().is_empty() {
            errors.push(FieldError {
                field: "model",
                message: "Model identifier is required",
            });
        }
        if !is_valid_base_url(&self.base_url) {
            errors.push(FieldError {
                field: "base_url",
                message: "Base URL must be a valid URL",
            });
        }
        if self.api_key.is_empty() {
            errors.push(FieldError {
                field: "api_key",
                message: "API Key is required",
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl NewProvider {
    /**
     * \brief Edit semantics for the credential: a blank key, or the masked copy
     * handed out by list, keeps the key already stored for `stored`.
     */
    pub fn keep_stored_key(&mut self, stored: &ProviderEntry) {
        let submitted = self.api_key.trim();
        if submitted.is_empty() || submitted == stored.masked_api_key() {
            self.api_key = stored.api_key.clone();
        }
    }
}

pub(crate) fn is_valid_base_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

/**
 * \brief Dialect-independent request forwarded upstream.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub prompt: String,
    /** \brief `None` means the active provider's configured model. */
    pub model: Option<String>,
}
