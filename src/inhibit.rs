// src/inhibit.rs
//! Operator inhibit: time-limited suppression of all automatic valve actuation.
//!
//! The gate is advisory. Actuation paths check it, act, and re-check before
//! the next action; a lock taken between a check and the command that
//! follows is honoured from the next check on.

use crate::bus::INHIBIT_KEY;
use crate::config::WarningConfig;
use crate::store::{SharedStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct InhibitGate {
    store: Arc<dyn SharedStore>,
}

impl InhibitGate {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Time left before the lock expires; zero when not held.
    pub async fn remaining(&self) -> Result<Duration, StoreError> {
        Ok(self.store.ttl(INHIBIT_KEY).await?.unwrap_or(Duration::ZERO))
    }

    /// Whether actuation must be suppressed right now. A store that cannot be
    /// read counts as held.
    pub async fn is_held(&self) -> bool {
        match self.remaining().await {
            Ok(ttl) => !ttl.is_zero(),
            Err(e) => {
                tracing::error!("cannot read inhibit lock, treating as held: {}", e);
                true
            }
        }
    }

    /// Operator pause. Always expires; there is no indefinite inhibit.
    pub async fn hold(&self, duration: Duration) -> Result<(), StoreError> {
        tracing::warn!("valve control inhibited for {:?}", duration);
        self.store.set(INHIBIT_KEY, "\"pause\"".to_string(), Some(duration)).await
    }

    /// Standard operator pause of `warning.inhibit_second`.
    pub async fn pause(&self, config: &WarningConfig) -> Result<(), StoreError> {
        self.hold(Duration::from_secs(config.inhibit_second)).await
    }

    /// Operator resume.
    pub async fn release(&self) -> Result<(), StoreError> {
        tracing::info!("valve control inhibit released");
        self.store.delete(INHIBIT_KEY).await
    }
}
