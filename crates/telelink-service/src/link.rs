//! Transport link backed by the host's own networking.
//!
//! The operating system owns association and addressing, so "connecting"
//! means confirming there is a route to the broker: a UDP socket connected
//! to the broker address reveals the local address the kernel would use,
//! without sending a packet.

use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::net::{UdpSocket, lookup_host};
use tracing::{debug, info};

use telelink_core::{Credentials, Error, LinkConfig, LinkInterface, Result, TransportLink};

/// [`TransportLink`] for a host whose network is managed by the OS.
#[derive(Debug)]
pub struct HostLink {
    probe_host: String,
    probe_port: u16,
    initialized: AtomicBool,
    connected: AtomicBool,
    address: Mutex<Option<IpAddr>>,
}

impl HostLink {
    /// Create a link that probes the route to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            probe_host: host.into(),
            probe_port: port,
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            address: Mutex::new(None),
        }
    }

    /// Local address the kernel picks for traffic to the probe target.
    async fn probe(&self) -> Result<IpAddr> {
        let target: SocketAddr = lookup_host((self.probe_host.as_str(), self.probe_port))
            .await
            .map_err(|e| Error::link(format!("cannot resolve {}: {}", self.probe_host, e)))?
            .next()
            .ok_or_else(|| Error::link(format!("{} has no addresses", self.probe_host)))?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket
            .connect(target)
            .await
            .map_err(|e| Error::link(format!("no route to {}: {}", target, e)))?;
        Ok(socket.local_addr()?.ip())
    }

    fn store_address(&self, address: Option<IpAddr>) {
        *self.address.lock().unwrap_or_else(|e| e.into_inner()) = address;
        self.connected.store(address.is_some(), Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportLink for HostLink {
    async fn init(&self, config: &LinkConfig) -> Result<()> {
        if config.interface == LinkInterface::Station {
            debug!("Station interface is managed by the host; association is not ours to drive");
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, credentials: &Credentials) -> Result<IpAddr> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::link("link manager not initialized"));
        }
        debug!(
            "Probing route to {}:{} (network '{}')",
            self.probe_host, self.probe_port, credentials.ssid
        );
        let address = self.probe().await?;
        info!("Host link up at {}", address);
        self.store_address(Some(address));
        Ok(address)
    }

    async fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match self.probe().await {
            Ok(address) => {
                self.store_address(Some(address));
                true
            }
            Err(e) => {
                debug!("Link probe failed: {}", e);
                self.store_address(None);
                false
            }
        }
    }

    async fn address(&self) -> Option<IpAddr> {
        *self.address.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn disconnect(&self) -> Result<()> {
        self.store_address(None);
        Ok(())
    }

    async fn deinit(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_init() {
        let link = HostLink::new("127.0.0.1", 1883);
        assert!(link.connect(&Credentials::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_loopback_probe() {
        let link = HostLink::new("127.0.0.1", 1883);
        link.init(&LinkConfig::default()).await.unwrap();
        let address = link.connect(&Credentials::default()).await.unwrap();
        assert!(address.is_loopback());
        assert!(link.is_connected().await);
        assert_eq!(link.address().await, Some(address));

        link.disconnect().await.unwrap();
        assert!(!link.is_connected().await);
        assert_eq!(link.address().await, None);
        link.deinit().await.unwrap();
    }
}
