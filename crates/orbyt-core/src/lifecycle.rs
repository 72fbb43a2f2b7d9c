// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Component lifecycle management.
//!
//! Components start in registration order and stop in reverse. `start`
//! aborts on the first failure; `stop` runs every component regardless
//! of failures so cleanup is maximal. Graceful shutdown races `stop`
//! against a deadline and forces the terminal state if the deadline
//! wins.

use crate::error::{EngineError, ErrorKind, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A startable/stoppable engine component.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Ordered component lifecycle manager.
pub struct LifecycleManager {
    components: Vec<Arc<dyn Component>>,
    state: Mutex<LifecycleState>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            state: Mutex::new(LifecycleState::Stopped),
        }
    }

    /// Registers a component. Startup order is registration order.
    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.push(component);
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock() = next;
    }

    /// Starts components in insertion order, aborting on the first
    /// failure.
    pub async fn start(&self) -> Result<()> {
        if self.state() != LifecycleState::Stopped {
            return Err(EngineError::runtime(
                ErrorKind::InternalError,
                format!("cannot start from state {:?}", self.state()),
            ));
        }
        self.set_state(LifecycleState::Starting);
        for component in &self.components {
            info!(component = component.name(), "Starting component");
            if let Err(e) = component.start().await {
                error!(component = component.name(), error = %e, "Component failed to start");
                self.set_state(LifecycleState::Error);
                return Err(e);
            }
        }
        self.set_state(LifecycleState::Running);
        Ok(())
    }

    /// Stops components in reverse order, continuing through failures.
    /// Returns the first failure after every component has been given
    /// the chance to stop.
    pub async fn stop(&self) -> Result<()> {
        self.set_state(LifecycleState::Stopping);
        let mut first_error = None;
        for component in self.components.iter().rev() {
            info!(component = component.name(), "Stopping component");
            if let Err(e) = component.stop().await {
                warn!(component = component.name(), error = %e, "Component failed to stop");
                first_error.get_or_insert(e);
            }
        }
        self.set_state(LifecycleState::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Races [`Self::stop`] against a deadline. If the deadline wins,
    /// the state is forced to `Stopped` and an error is raised.
    pub async fn graceful_shutdown(&self, deadline: Duration) -> Result<()> {
        match tokio::time::timeout(deadline, self.stop()).await {
            Ok(result) => result,
            Err(_) => {
                self.set_state(LifecycleState::Stopped);
                Err(EngineError::runtime(
                    ErrorKind::StepTimeout,
                    format!("shutdown exceeded {}ms deadline", deadline.as_millis()),
                ))
            }
        }
    }

    /// Resolves when the process receives an interrupt, terminate or
    /// hangup signal. The caller then triggers [`Self::graceful_shutdown`]
    /// once.
    pub async fn wait_for_shutdown_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut interrupt = signal(SignalKind::interrupt()).expect("interrupt handler");
            let mut terminate = signal(SignalKind::terminate()).expect("terminate handler");
            let mut hangup = signal(SignalKind::hangup()).expect("hangup handler");
            tokio::select! {
                _ = interrupt.recv() => info!("Received interrupt signal"),
                _ = terminate.recv() => info!("Received terminate signal"),
                _ = hangup.recv() => info!("Received hangup signal"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.components.iter().map(|c| c.name()).collect();
        f.debug_struct("LifecycleManager")
            .field("components", &names)
            .field("state", &self.state())
            .finish()
    }
}
