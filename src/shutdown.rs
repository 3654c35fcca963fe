// src/shutdown.rs
//! Process-wide termination signal.
//!
//! Every timed wait in the controller goes through [`Shutdown::sleep`], which
//! returns as soon as the signal fires instead of at the end of the wait.
//! Dropping the [`ShutdownTrigger`] counts as firing it.

use crate::error::ControlError;
use std::time::Duration;
use tokio::sync::watch;

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn check(&self) -> Result<(), ControlError> {
        if self.is_triggered() {
            Err(ControlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// `Err(Cancelled)` when shutdown arrives before or during the wait.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), ControlError> {
        self.check()?;
        tokio::select! {
            _ = self.triggered() => Err(ControlError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
