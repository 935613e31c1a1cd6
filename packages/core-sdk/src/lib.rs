pub mod config;
pub mod db;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod models;
pub mod normalizer;
pub mod selector;
pub mod server;
pub mod telemetry;

/**
 * \brief Common re-exports for embedding the gateway.
 */
pub mod prelude {
    pub use crate::config::{Config, GatewayConfig};
    pub use crate::db::{ActivationOutcome, ProviderStore, SqliteProviderStore};
    pub use crate::error::{ErrorKind, GatewayError};
    pub use crate::facade::GatewayFacade;
    pub use crate::gateway::{ForwardMode, ForwardingGateway, UpstreamResponse};
    pub use crate::models::{NewProvider, NormalizedRequest, ProviderEntry};
    pub use crate::normalizer::ClientDialect;
    pub use crate::selector::{Activation, ActiveProviderSelector};
    pub use crate::server::AppState;
}
