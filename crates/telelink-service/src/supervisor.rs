//! Restart policy around the connectivity lifecycle.
//!
//! Each lifecycle gets a fresh [`LifecycleController`] (and with it a fresh
//! command queue and ledger) while the link, session, sensor, display and
//! shared state carry over, so the last known temperature and setpoint
//! survive a reconnect.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use telelink_core::{
    DisplaySink, EventDispatcher, ExitReason, LifecycleController, MessagingSession, Result,
    SensorSource, SharedState, TransportLink,
};

use crate::config::Config;
use crate::handler::SetpointHandler;

/// How a supervised run ended.
#[derive(Debug)]
pub struct SupervisorReport {
    /// Lifecycles started.
    pub lifecycles: u32,
    /// Outcome of the final lifecycle.
    pub last: Result<ExitReason>,
}

impl SupervisorReport {
    /// Whether the run ended because shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        matches!(&self.last, Ok(reason) if reason.is_shutdown())
    }
}

/// Runs lifecycles back to back according to the restart configuration.
pub struct Supervisor {
    config: Config,
    link: Arc<dyn TransportLink>,
    session: Arc<dyn MessagingSession>,
    sensor: Arc<dyn SensorSource>,
    display: Arc<dyn DisplaySink>,
    state: Arc<SharedState>,
    events: EventDispatcher,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor. Shared state starts from the configured initial values.
    pub fn new(
        config: Config,
        link: Arc<dyn TransportLink>,
        session: Arc<dyn MessagingSession>,
        sensor: Arc<dyn SensorSource>,
        display: Arc<dyn DisplaySink>,
    ) -> Self {
        let activities = &config.lifecycle.activities;
        let state = Arc::new(SharedState::new(
            activities.initial_temperature,
            activities.initial_setpoint,
        ));
        Self {
            config,
            link,
            session,
            sensor,
            display,
            state,
            events: EventDispatcher::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// State shared by every lifecycle.
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Lifecycle events of every run.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Cancel this token to end the current lifecycle and stop restarting.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn controller(&self) -> Result<LifecycleController> {
        let handler = SetpointHandler::new(Arc::clone(&self.state), self.config.setpoint.clone());
        LifecycleController::builder(Arc::clone(&self.link), Arc::clone(&self.session))
            .config(self.config.lifecycle.clone())
            .sensor(Arc::clone(&self.sensor))
            .display(Arc::clone(&self.display))
            .handler(Arc::new(handler))
            .state(Arc::clone(&self.state))
            .events(self.events.clone())
            .shutdown(self.shutdown.clone())
            .build()
    }

    /// Run lifecycles until shutdown, a configuration error, or the restart
    /// budget is spent.
    pub async fn run(&self) -> SupervisorReport {
        let restart = &self.config.restart;
        let mut lifecycles = 0u32;
        let mut restarts = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return SupervisorReport {
                    lifecycles,
                    last: Ok(ExitReason::Shutdown),
                };
            }

            let controller = match self.controller() {
                Ok(controller) => controller,
                Err(e) => {
                    error!("Cannot start lifecycle: {}", e);
                    return SupervisorReport {
                        lifecycles,
                        last: Err(e),
                    };
                }
            };

            lifecycles += 1;
            let last = controller.run().await;
            match &last {
                Ok(ExitReason::Shutdown) => {
                    info!("Lifecycle {} stopped on request", lifecycles);
                    return SupervisorReport { lifecycles, last };
                }
                Ok(reason) => warn!("Lifecycle {} ended: {}", lifecycles, reason),
                Err(e) => error!("Lifecycle {} failed: {}", lifecycles, e),
            }

            let budget_spent = restart.max_restarts.is_some_and(|max| restarts >= max);
            if !restart.enabled || budget_spent {
                info!("Not restarting after {} lifecycles", lifecycles);
                return SupervisorReport { lifecycles, last };
            }

            restarts += 1;
            info!(
                "Restarting in {:?} (restart {}{})",
                restart.delay,
                restarts,
                restart
                    .max_restarts
                    .map(|max| format!(" of {}", max))
                    .unwrap_or_default()
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return SupervisorReport {
                        lifecycles,
                        last: Ok(ExitReason::Shutdown),
                    };
                }
                _ = tokio::time::sleep(restart.delay) => {}
            }
        }
    }
}
