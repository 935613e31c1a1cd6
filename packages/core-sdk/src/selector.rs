use std::sync::Arc;

use crate::{
    db::{ActivationOutcome, ProviderStore},
    error::GatewayError,
    models::ProviderEntry,
};

/**
 * \brief Outcome of a successful activation.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub id: i64,
    /** \brief `false` when the entry was already the only active one. */
    pub changed: bool,
}

/**
 * \brief Answers "which provider is active" and performs exclusive activation.
 * \details Serialization of activations against reads is delegated to
 * `ProviderStore::set_active_exclusive`; the selector never holds a lock of
 * its own, so nothing here can be held across the outbound call.
 */
#[derive(Clone)]
pub struct ActiveProviderSelector {
    store: Arc<dyn ProviderStore>,
}

impl ActiveProviderSelector {
    pub fn new(store: Arc<dyn ProviderStore>) -> Self {
        Self { store }
    }

    /**
     * \brief Current active provider, or `None` when zero or (anomalously) several are flagged.
     */
    pub fn get_active(&self) -> Result<Option<ProviderEntry>, GatewayError> {
        let mut active = self.store.active_entries()?;
        match active.len() {
            0 => Ok(None),
            1 => Ok(active.pop()),
            n => {
                let ids: Vec<i64> = active.iter().map(|p| p.id).collect();
                tracing::error!(count = n, ?ids, "data integrity: several providers flagged active");
                Ok(None)
            }
        }
    }

    /**
     * \brief Makes `id` the single active provider.
     */
    pub fn activate(&self, id: i64) -> Result<Activation, GatewayError> {
        match self.store.set_active_exclusive(id)? {
            ActivationOutcome::Activated => Ok(Activation { id, changed: true }),
            ActivationOutcome::AlreadyActive => Ok(Activation { id, changed: false }),
            ActivationOutcome::NotFound => Err(GatewayError::ActivationConflict(format!(
                "LLM entry {} does not exist",
                id
            ))),
        }
    }
}
