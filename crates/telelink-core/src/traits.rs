//! Collaborator trait abstractions.
//!
//! The lifecycle controller only talks to the outside world through these
//! traits. Real implementations live in the service crate; [`crate::mock`]
//! provides scriptable ones for tests.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::link::{Credentials, LinkConfig};
use crate::session::{
    BrokerInfo, InboundMessage, NetworkBuffer, Qos, SecurityInfo, SessionEvent, SessionHandle,
};
use crate::state::DisplayFrame;

/// Network link manager (Wi-Fi station, Ethernet, ...).
///
/// `connect` makes a single attempt; retrying is the caller's business.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Initialize the link manager.
    async fn init(&self, config: &LinkConfig) -> Result<()>;

    /// Join the network and obtain an address.
    async fn connect(&self, credentials: &Credentials) -> Result<IpAddr>;

    /// Whether the link is currently up.
    async fn is_connected(&self) -> bool;

    /// Current address, if the link is up.
    async fn address(&self) -> Option<IpAddr>;

    /// Leave the network.
    async fn disconnect(&self) -> Result<()>;

    /// Shut the link manager down.
    async fn deinit(&self) -> Result<()>;
}

/// Publish/subscribe messaging library.
///
/// `connect` makes a single attempt. Asynchronous events are delivered to the
/// callback passed to `create`, on whatever task the library chooses.
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// Process-wide library initialization.
    async fn lib_init(&self) -> Result<()>;

    /// Create a session object bound to `buffer`.
    async fn create(
        &self,
        buffer: NetworkBuffer,
        broker: &BrokerInfo,
        security: &SecurityInfo,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<SessionHandle>;

    /// Connect the session to the broker as `client_id`.
    async fn connect(&self, handle: SessionHandle, client_id: &str) -> Result<()>;

    /// Publish a payload.
    async fn publish(&self, handle: SessionHandle, topic: &str, payload: Bytes, qos: Qos)
    -> Result<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, handle: SessionHandle, topic: &str, qos: Qos) -> Result<()>;

    /// Disconnect from the broker.
    async fn disconnect(&self, handle: SessionHandle) -> Result<()>;

    /// Destroy the session object.
    async fn delete(&self, handle: SessionHandle) -> Result<()>;

    /// Process-wide library shutdown.
    async fn lib_deinit(&self) -> Result<()>;
}

/// Receiver of asynchronous session events.
#[async_trait]
pub trait SessionCallback: Send + Sync {
    /// Handle one event.
    async fn on_event(&self, handle: SessionHandle, event: SessionEvent);
}

/// Consumer of inbound messages. Must not block for long.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Handle one inbound message.
    async fn on_message(&self, message: &InboundMessage);
}

/// Temperature sensor.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Read the current temperature in degrees Celsius.
    async fn read_celsius(&self) -> Result<f32>;
}

/// Local status display.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Draw one frame.
    async fn render(&self, frame: &DisplayFrame) -> Result<()>;
}
