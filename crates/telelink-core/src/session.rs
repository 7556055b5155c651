//! Messaging session value types.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::link::redacted;

/// Opaque handle to a created session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Delivery guarantee for publish and subscribe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery.
    #[default]
    AtLeastOnce,
    /// Assured single delivery.
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid QoS level {}", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos as u8
    }
}

/// Broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerInfo {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Use TLS.
    pub tls: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
}

impl Default for BrokerInfo {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            tls: false,
            keep_alive_secs: 60,
        }
    }
}

impl fmt::Display for BrokerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Session authentication material. Secrets are hidden from `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityInfo {
    /// Username for broker authentication.
    pub username: Option<String>,
    /// Password for broker authentication.
    pub password: Option<String>,
    /// PEM file with the CA certificate, when the broker uses TLS.
    pub ca_path: Option<PathBuf>,
}

impl fmt::Debug for SecurityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityInfo")
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(redacted))
            .field("ca_path", &self.ca_path)
            .finish()
    }
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create an inbound message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Asynchronous events reported by a messaging session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The broker connection dropped.
    Disconnected,
    /// A message arrived on a subscribed topic.
    MessageReceived(InboundMessage),
    /// A queued publish was rejected.
    PublishFailed {
        /// Topic of the failed publish.
        topic: String,
        /// Library-provided reason.
        reason: String,
    },
    /// A subscription request was rejected.
    SubscribeFailed {
        /// Topic of the failed subscription.
        topic: String,
        /// Library-provided reason.
        reason: String,
    },
    /// Anything the library reports that the callback does not model.
    Other(String),
}

/// Send/receive scratch buffer lent to a session.
///
/// Clones share the same storage; it is freed when the last clone drops.
#[derive(Clone)]
pub struct NetworkBuffer {
    storage: Arc<Mutex<Vec<u8>>>,
    size: usize,
}

impl NetworkBuffer {
    /// Allocate a zeroed buffer of `size` bytes without aborting on failure.
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::BufferAllocation { size });
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(size)
            .map_err(|_| Error::BufferAllocation { size })?;
        storage.resize(size, 0);
        Ok(Self {
            storage: Arc::new(Mutex::new(storage)),
            size,
        })
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` with exclusive access to the bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut storage)
    }

    /// Number of live clones, including this one.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.storage)
    }
}

impl fmt::Debug for NetworkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkBuffer")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
