//! The lifecycle controller.
//!
//! Owns the connectivity stack and the command queue, subscribes and starts
//! the activities once the session is up and drives the whole thing back down when the
//! session is lost.
//!
//! ```text
//! Disconnected -> LinkUp -> SessionUp -> Degraded -> Disconnected
//!                    \__________________________________/
//!                         (bring-up failure)
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activities::{Activities, ActivityHandle, DisplayRefresher, Publisher, Sampler};
use crate::callback::{EventCallback, SessionFlag};
use crate::commands::{
    CommandReceiver, CommandSender, PendingCommand, TrySendError, command_queue,
};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, LifecycleEvent};
use crate::ledger::ResourceLedger;
use crate::session::SessionHandle;
use crate::stack::ConnectivityStack;
use crate::state::{ConnectivityState, SharedState};
use crate::traits::{DisplaySink, MessagingSession, SensorSource, SubscriptionHandler, TransportLink};

/// Why a lifecycle ended after the session had come up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The broker dropped the session.
    SessionLost,
    /// A publish failed.
    PublishFailed {
        /// Topic of the failed publish.
        topic: String,
    },
    /// A subscription failed.
    SubscribeFailed {
        /// Topic of the failed subscription.
        topic: String,
    },
    /// Shutdown was requested.
    Shutdown,
}

impl ExitReason {
    /// Whether the lifecycle ended because it was asked to.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ExitReason::Shutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::SessionLost => f.write_str("session lost"),
            ExitReason::PublishFailed { topic } => write!(f, "publish to '{}' failed", topic),
            ExitReason::SubscribeFailed { topic } => write!(f, "subscribe to '{}' failed", topic),
            ExitReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// Drives one connectivity lifecycle from nothing to session-up and back.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use telelink_core::mock::{MockLink, MockSensor, MockSession, RecordingDisplay, RecordingHandler};
/// use telelink_core::{ControllerConfig, Credentials, LifecycleController};
///
/// # async fn example() -> telelink_core::Result<()> {
/// let mut config = ControllerConfig::default();
/// config.link.credentials = Credentials::new("lab", "password");
///
/// let controller = LifecycleController::builder(Arc::new(MockLink::new()), Arc::new(MockSession::new()))
///     .config(config)
///     .sensor(Arc::new(MockSensor::new(21.0)))
///     .display(Arc::new(RecordingDisplay::new()))
///     .handler(Arc::new(RecordingHandler::new()))
///     .build()?;
///
/// let shutdown = controller.shutdown_token();
/// let run = tokio::spawn(controller.run());
/// shutdown.cancel();
/// let _reason = run.await.expect("controller task")?;
/// # Ok(())
/// # }
/// ```
pub struct LifecycleController {
    config: ControllerConfig,
    stack: ConnectivityStack,
    state: Arc<SharedState>,
    sensor: Arc<dyn SensorSource>,
    display: Arc<dyn DisplaySink>,
    handler: Arc<dyn SubscriptionHandler>,
    commands: CommandSender,
    receiver: CommandReceiver,
    flag: SessionFlag,
    events: EventDispatcher,
    connectivity: watch::Sender<ConnectivityState>,
    shutdown: CancellationToken,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &*self.connectivity.borrow())
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    /// Start building a controller around a link and a session.
    pub fn builder(
        link: Arc<dyn TransportLink>,
        session: Arc<dyn MessagingSession>,
    ) -> LifecycleControllerBuilder {
        LifecycleControllerBuilder::new(link, session)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Watch connectivity state changes.
    pub fn observe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.subscribe()
    }

    /// Watch the resource ledger.
    pub fn observe_ledger(&self) -> watch::Receiver<ResourceLedger> {
        self.stack.observe_ledger()
    }

    /// A producer handle onto the command queue.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.clone()
    }

    /// State shared with the activities.
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Flag the session callback clears on disconnect.
    pub fn session_flag(&self) -> SessionFlag {
        self.flag.clone()
    }

    /// Token that ends the lifecycle when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one lifecycle to completion.
    ///
    /// Returns the reason the session ended, or the bring-up error. Either
    /// way every acquired resource has been released (or its release failure
    /// logged) by the time this returns.
    pub async fn run(mut self) -> Result<ExitReason> {
        info!("Starting connectivity lifecycle");

        let handle = match self.bring_up().await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Bring-up failed: {}", e);
                self.release_all().await;
                self.transition(ConnectivityState::Disconnected);
                return Err(e);
            }
        };

        self.flag.set(true);
        self.state.connected.set(true).await;
        self.transition(ConnectivityState::SessionUp);

        self.subscribe_all(handle).await;
        let mut activities = self.start_activities(handle);
        debug!("Running activities: {:?}", activities.names());

        let reason = self.serve().await;
        info!("Leaving session: {}", reason);

        self.wind_down(&mut activities).await;
        Ok(reason)
    }

    async fn bring_up(&mut self) -> Result<SessionHandle> {
        self.stack.init_link(&self.config.link).await?;
        self.stack.connect_link(&self.config.link).await?;
        self.transition(ConnectivityState::LinkUp);

        let callback = Arc::new(EventCallback::new(
            self.commands.clone(),
            Arc::clone(&self.handler),
            self.config.queue.inbound_routing,
            self.flag.clone(),
            self.config.queue.warn_after,
        ));
        self.stack
            .bring_up_session(&self.config.link, &self.config.session, callback)
            .await
    }

    fn start_activities(&self, handle: SessionHandle) -> Activities {
        let mut activities = Activities::default();
        let session = self.stack.session();

        let display = DisplayRefresher::new(Arc::clone(&self.display), Arc::clone(&self.state));
        activities.push_local(ActivityHandle::spawn(
            "display",
            &self.shutdown,
            &self.events,
            |token| display.run(token),
        ));

        let publisher = Publisher::new(
            session,
            handle,
            Arc::clone(&self.state),
            self.commands.clone(),
            &self.config.session,
        );
        activities.push_session_bound(ActivityHandle::spawn(
            "publisher",
            &self.shutdown,
            &self.events,
            |token| publisher.run(token),
        ));

        let sampler = Sampler::new(
            Arc::clone(&self.sensor),
            Arc::clone(&self.state),
            self.config.activities.sample_period,
        );
        activities.push_local(ActivityHandle::spawn(
            "sampler",
            &self.shutdown,
            &self.events,
            |token| sampler.run(token),
        ));

        activities
    }

    /// Subscribe to every configured topic, stopping at the first failure.
    ///
    /// A failure is queued as `SubscribeFailed` for the command loop.
    async fn subscribe_all(&self, handle: SessionHandle) {
        let session = self.stack.session();
        let qos = self.config.session.qos;
        for topic in &self.config.session.subscriptions {
            match session.subscribe(handle, topic, qos).await {
                Ok(()) => info!("Subscribed to '{}'", topic),
                Err(e) => {
                    warn!("Subscribe to '{}' failed: {}", topic, e);
                    self.enqueue(PendingCommand::SubscribeFailed {
                        topic: topic.clone(),
                    });
                    return;
                }
            }
        }
    }

    /// Queue a command for this controller's own command loop.
    ///
    /// Never waits on the queue: only `serve` drains it. If it is full the
    /// send completes from a separate task once `serve` makes room.
    fn enqueue(&self, command: PendingCommand) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                debug!("Command queue full; queuing '{}' from a task", command.kind());
                let commands = self.commands.clone();
                let warn_after = self.config.queue.warn_after;
                tokio::spawn(async move {
                    if commands.send_patiently(command, warn_after).await.is_err() {
                        debug!("Controller finished before the command was queued");
                    }
                });
            }
            Err(TrySendError::Closed(command)) => {
                debug!("Command queue closed; dropping '{}'", command.kind());
            }
        }
    }

    /// Handle commands until one ends the session.
    async fn serve(&mut self) -> ExitReason {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return ExitReason::Shutdown,
                command = self.receiver.recv() => command,
            };
            // The controller holds a sender, so the queue never closes here.
            let Some(command) = command else {
                return ExitReason::SessionLost;
            };

            info!("Received command: {}", command);
            self.events.send(LifecycleEvent::CommandReceived {
                command: command.kind().to_string(),
            });

            match command {
                PendingCommand::MessageReceived(message) => {
                    self.handler.on_message(&message).await;
                }
                PendingCommand::Disconnected => return ExitReason::SessionLost,
                PendingCommand::PublishFailed { topic } => {
                    return ExitReason::PublishFailed { topic };
                }
                PendingCommand::SubscribeFailed { topic } => {
                    return ExitReason::SubscribeFailed { topic };
                }
            }
        }
    }

    /// Stop publishing, release everything, stop the rest.
    async fn wind_down(&mut self, activities: &mut Activities) {
        // No producer can notify the publisher after this returns.
        self.state.connected.set(false).await;
        activities.stop_session_bound(&self.events).await;
        self.state.publisher.clear();

        if !self.flag.is_set() {
            debug!("Broker already dropped the session");
        }
        self.flag.set(false);
        self.transition(ConnectivityState::Degraded);

        self.release_all().await;
        activities.stop_local(&self.events).await;

        let discarded = self.receiver.drain();
        if discarded > 0 {
            debug!("Discarded {} commands queued after the session ended", discarded);
        }
        self.transition(ConnectivityState::Disconnected);
    }

    async fn release_all(&mut self) {
        let report = self.stack.teardown().await;
        if report.is_clean() {
            debug!("Released {:?}", report.released);
        } else {
            let failed: Vec<_> = report.failed.iter().map(|(stage, _)| *stage).collect();
            error!(
                "Teardown left {:?} held; {} stages released",
                failed,
                report.released.len()
            );
        }
    }

    fn transition(&self, to: ConnectivityState) {
        let from = *self.connectivity.borrow();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!("Unexpected connectivity transition {} -> {}", from, to);
        }
        info!("Connectivity {} -> {}", from, to);
        self.connectivity.send_replace(to);
        self.events.send(LifecycleEvent::StateChanged { from, to });
    }
}

/// Builder for [`LifecycleController`].
#[must_use]
pub struct LifecycleControllerBuilder {
    link: Arc<dyn TransportLink>,
    session: Arc<dyn MessagingSession>,
    config: ControllerConfig,
    sensor: Option<Arc<dyn SensorSource>>,
    display: Option<Arc<dyn DisplaySink>>,
    handler: Option<Arc<dyn SubscriptionHandler>>,
    state: Option<Arc<SharedState>>,
    events: Option<EventDispatcher>,
    shutdown: Option<CancellationToken>,
}

impl LifecycleControllerBuilder {
    fn new(link: Arc<dyn TransportLink>, session: Arc<dyn MessagingSession>) -> Self {
        Self {
            link,
            session,
            config: ControllerConfig::default(),
            sensor: None,
            display: None,
            handler: None,
            state: None,
            events: None,
            shutdown: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the temperature sensor.
    pub fn sensor(mut self, sensor: Arc<dyn SensorSource>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Set the display.
    pub fn display(mut self, display: Arc<dyn DisplaySink>) -> Self {
        self.display = Some(display);
        self
    }

    /// Set the inbound message handler.
    pub fn handler(mut self, handler: Arc<dyn SubscriptionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Share existing state, e.g. to keep values across lifecycles.
    pub fn state(mut self, state: Arc<SharedState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Report events on an existing dispatcher.
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// End the lifecycle when `token` is cancelled.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Validate the configuration and build the controller.
    pub fn build(self) -> Result<LifecycleController> {
        self.config.validate()?;
        let sensor = self
            .sensor
            .ok_or_else(|| Error::invalid_config("a sensor is required"))?;
        let display = self
            .display
            .ok_or_else(|| Error::invalid_config("a display is required"))?;
        let handler = self
            .handler
            .ok_or_else(|| Error::invalid_config("a subscription handler is required"))?;

        let activities = &self.config.activities;
        let state = self.state.unwrap_or_else(|| {
            Arc::new(SharedState::new(
                activities.initial_temperature,
                activities.initial_setpoint,
            ))
        });
        let events = self.events.unwrap_or_default();
        let (commands, receiver) = command_queue(self.config.queue.capacity);
        let (connectivity, _) = watch::channel(ConnectivityState::Disconnected);

        Ok(LifecycleController {
            stack: ConnectivityStack::new(self.link, self.session, events.clone()),
            config: self.config,
            state,
            sensor,
            display,
            handler,
            commands,
            receiver,
            flag: SessionFlag::new(),
            events,
            connectivity,
            shutdown: self.shutdown.unwrap_or_default(),
        })
    }
}
