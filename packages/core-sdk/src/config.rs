use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

/** \brief Upper bound on a single upstream call. */
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5000;
/** \brief `max_tokens` sent on the canonical completion path. */
pub const DEFAULT_COMPLETION_MAX_TOKENS: u32 = 50;

/**
 * \brief Process configuration, read from `EXLOAPI_*` environment variables.
 */
#[derive(Debug, Clone)]
pub struct Config {
    /** \brief SQLite file holding the provider registry. */
    pub db_path: PathBuf,
    /** \brief Directory with the built frontend served as fallback. */
    pub ui_dir: PathBuf,
    /** \brief When set, JSON logs are also written here. */
    pub log_dir: Option<PathBuf>,
    pub gateway: GatewayConfig,
}

/**
 * \brief Knobs of the forwarding gateway.
 */
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub upstream_timeout: Duration,
    pub completion_max_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
            completion_max_tokens: DEFAULT_COMPLETION_MAX_TOKENS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("exloapi.db"),
            ui_dir: PathBuf::from("frontend/build"),
            log_dir: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief Builds the config from any key lookup; unset or blank keys keep defaults.
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(path) = get("EXLOAPI_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dir) = get("EXLOAPI_UI_DIR") {
            config.ui_dir = PathBuf::from(dir);
        }
        config.log_dir = get("EXLOAPI_LOG_DIR").map(PathBuf::from);
        if let Some(ms) = get("EXLOAPI_UPSTREAM_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("EXLOAPI_UPSTREAM_TIMEOUT_MS is not a number: {}", ms))?;
            anyhow::ensure!(ms > 0, "EXLOAPI_UPSTREAM_TIMEOUT_MS must be positive");
            config.gateway.upstream_timeout = Duration::from_millis(ms);
        }
        if let Some(tokens) = get("EXLOAPI_COMPLETION_MAX_TOKENS") {
            config.gateway.completion_max_tokens = tokens.trim().parse().with_context(|| {
                format!("EXLOAPI_COMPLETION_MAX_TOKENS is not a number: {}", tokens)
            })?;
        }
        Ok(config)
    }
}
