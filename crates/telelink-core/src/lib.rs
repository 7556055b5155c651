//! Connectivity lifecycle core for networked telemetry devices.
//!
//! This crate brings a device's network link and messaging session up in a
//! fixed order, runs producer and consumer activities while the session is
//! connected, and tears everything down again (in reverse, releasing only
//! what was actually acquired) when the session is lost.
//!
//! # Features
//!
//! - **Ordered bring-up**: link init, link connect, library init, buffer,
//!   session create, client identifier, session connect
//! - **Resource ledger**: teardown releases exactly the acquired stages
//! - **Bounded retry**: fixed-interval retry for link and session connect
//! - **Command queue**: bounded FIFO from activities and the session callback
//!   to the controller
//! - **Shared values**: guarded state with change signals that never lose or
//!   queue up wake-ups
//! - **Mock collaborators**: failure injection for every acquire and release
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use telelink_core::mock::{MockLink, MockSensor, MockSession, RecordingDisplay, RecordingHandler};
//! use telelink_core::{ControllerConfig, Credentials, LifecycleController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ControllerConfig::default();
//!     config.link.credentials = Credentials::new("lab", "password");
//!
//!     let controller = LifecycleController::builder(
//!         Arc::new(MockLink::new()),
//!         Arc::new(MockSession::new()),
//!     )
//!     .config(config)
//!     .sensor(Arc::new(MockSensor::new(21.0)))
//!     .display(Arc::new(RecordingDisplay::new()))
//!     .handler(Arc::new(RecordingHandler::new()))
//!     .build()?;
//!
//!     let reason = controller.run().await?;
//!     println!("Lifecycle ended: {}", reason);
//!     Ok(())
//! }
//! ```

pub mod activities;
pub mod callback;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod ledger;
pub mod link;
pub mod mock;
pub mod retry;
pub mod session;
pub mod shared;
pub mod signal;
pub mod stack;
pub mod state;
pub mod traits;
pub mod util;

pub use telelink_types::{Mode, ParseError, fahrenheit_from_celsius, parse_setpoint};

pub use callback::{EventCallback, SessionFlag};
pub use commands::{
    CommandReceiver, CommandSender, PendingCommand, TrySendError, command_queue,
};
pub use config::{
    ActivityOptions, ControllerConfig, InboundRouting, LinkOptions, QueueOptions, SessionOptions,
};
pub use controller::{ExitReason, LifecycleController, LifecycleControllerBuilder};
pub use error::{Error, ProtocolFailure, Result, SessionStage};
pub use events::{EventDispatcher, EventReceiver, EventSender, LifecycleEvent};
pub use ledger::{ResourceLedger, Stage};
pub use link::{Credentials, LinkConfig, LinkInterface, LinkSecurity};
pub use retry::{RetryError, RetryPolicy, with_retry};
pub use session::{
    BrokerInfo, InboundMessage, NetworkBuffer, Qos, SecurityInfo, SessionEvent, SessionHandle,
};
pub use shared::SharedValue;
pub use signal::{ChangeSet, ChangeSignal, Coalesce, NotifySlot};
pub use stack::{ConnectivityStack, TeardownReport};
pub use state::{ConnectivityState, DisplayFrame, SharedState};
pub use traits::{
    DisplaySink, MessagingSession, SensorSource, SessionCallback, SubscriptionHandler,
    TransportLink,
};
