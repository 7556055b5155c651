//! MQTT messaging session over rumqttc.
//!
//! # Event delivery
//!
//! `connect` drives the rumqttc event loop until the broker's ConnAck, then
//! hands the loop to a background task. That task forwards incoming
//! publishes and rejected subscriptions to the session callback, and reports
//! `Disconnected` once when the connection drops (unless the drop was our
//! own disconnect).
//!
//! # Example Configuration
//!
//! ```toml
//! [lifecycle.session.broker]
//! host = "mqtt.local"
//! port = 8883
//! tls = true
//!
//! [lifecycle.session.security]
//! username = "thermostat"
//! password = "secret"
//! ca_path = "/etc/telelink/ca.pem"
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use telelink_core::{
    BrokerInfo, Error, InboundMessage, MessagingSession, NetworkBuffer, Qos, Result,
    SecurityInfo, SessionCallback, SessionEvent, SessionHandle, SessionStage,
};

/// Traces a SubAck back to the topic it answers.
///
/// rumqttc writes requests in the order they are made and reports each
/// write with its packet id. Requested topics queue here until their write
/// is seen, then wait under that packet id for the broker's answer.
#[derive(Clone, Default)]
struct SubscriptionTracker {
    requested: Arc<StdMutex<VecDeque<String>>>,
    in_flight: Arc<StdMutex<HashMap<u16, String>>>,
}

impl SubscriptionTracker {
    fn requested(&self, topic: &str) {
        lock(&self.requested).push_back(topic.to_string());
    }

    /// The most recent request never reached rumqttc.
    fn withdraw_last(&self) {
        lock(&self.requested).pop_back();
    }

    fn sent(&self, pkid: u16) {
        if let Some(topic) = lock(&self.requested).pop_front() {
            lock(&self.in_flight).insert(pkid, topic);
        }
    }

    fn acknowledged(&self, pkid: u16) -> String {
        lock(&self.in_flight)
            .remove(&pkid)
            .unwrap_or_else(|| format!("<unknown, packet {}>", pkid))
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Requests rumqttc may buffer before `publish` waits.
const REQUEST_CAPACITY: usize = 16;

/// How long `connect` waits for the broker's ConnAck by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// State of the one live session.
struct Slot {
    handle: SessionHandle,
    broker: BrokerInfo,
    security: SecurityInfo,
    callback: Arc<dyn SessionCallback>,
    buffer: NetworkBuffer,
    client: Option<AsyncClient>,
    events: Option<JoinHandle<()>>,
    closing: Arc<AtomicBool>,
    subscriptions: SubscriptionTracker,
}

impl Slot {
    fn client(&self) -> Result<&AsyncClient> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::session(SessionStage::Connect, "session is not connected"))
    }

    fn stop_events(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.events.take() {
            task.abort();
        }
    }
}

/// [`MessagingSession`] speaking MQTT 3.1.1 through rumqttc.
pub struct MqttSession {
    slot: Mutex<Option<Slot>>,
    next_handle: AtomicU64,
    initialized: AtomicBool,
    connect_timeout: Duration,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for MqttSession {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl MqttSession {
    /// Create a session that waits up to `connect_timeout` for the broker's ConnAck.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            next_handle: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            connect_timeout,
        }
    }

    async fn with_slot<T>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut Slot) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(slot) if slot.handle == handle => f(slot),
            _ => Err(Error::session(
                SessionStage::Create,
                format!("unknown session {}", handle),
            )),
        }
    }
}

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn mqtt_options(
    client_id: &str,
    broker: &BrokerInfo,
    security: &SecurityInfo,
    buffer: &NetworkBuffer,
    ca: Option<Vec<u8>>,
) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(u64::from(broker.keep_alive_secs.max(5))));
    options.set_max_packet_size(buffer.size(), buffer.size());
    options.set_clean_session(true);

    if let Some(username) = &security.username {
        let password = security.password.clone().unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    if broker.tls {
        let transport = match ca {
            Some(ca) => Transport::tls_with_config(TlsConfiguration::SimpleNative {
                ca,
                client_auth: None,
            }),
            None => Transport::tls_with_config(TlsConfiguration::Native),
        };
        options.set_transport(transport);
    }
    options
}

/// CA certificate for a TLS broker, if one is configured.
async fn read_ca(broker: &BrokerInfo, security: &SecurityInfo) -> Result<Option<Vec<u8>>> {
    match (&security.ca_path, broker.tls) {
        (Some(path), true) => Ok(Some(tokio::fs::read(path).await?)),
        _ => Ok(None),
    }
}

/// Poll until ConnAck, or fail.
async fn await_connack(eventloop: &mut EventLoop, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(Error::session(
                        SessionStage::Connect,
                        format!("broker refused connection: {:?}", ack.code),
                    ))
                };
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return Err(Error::session(SessionStage::Connect, e.to_string())),
            Err(_) => {
                return Err(Error::session(
                    SessionStage::Connect,
                    format!("no ConnAck within {:?}", limit),
                ));
            }
        }
    }
}

/// Forward broker traffic to the callback until the connection drops.
async fn forward_events(
    mut eventloop: EventLoop,
    handle: SessionHandle,
    callback: Arc<dyn SessionCallback>,
    closing: Arc<AtomicBool>,
    subscriptions: SubscriptionTracker,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                SessionEvent::MessageReceived(InboundMessage::new(publish.topic, publish.payload))
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                subscriptions.sent(pkid);
                continue;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let topic = subscriptions.acknowledged(ack.pkid);
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if !rejected {
                    debug!("Broker accepted subscription to '{}'", topic);
                    continue;
                }
                SessionEvent::SubscribeFailed {
                    topic,
                    reason: "broker rejected subscription".to_string(),
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                debug!("Broker sent Disconnect");
                break;
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                debug!("MQTT ping response received");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                if !closing.load(Ordering::SeqCst) {
                    warn!("MQTT connection error: {}", e);
                }
                break;
            }
        };
        callback.on_event(handle, event).await;
    }

    if !closing.load(Ordering::SeqCst) {
        callback.on_event(handle, SessionEvent::Disconnected).await;
    }
}

#[async_trait]
impl MessagingSession for MqttSession {
    async fn lib_init(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        debug!("MQTT client initialized");
        Ok(())
    }

    async fn create(
        &self,
        buffer: NetworkBuffer,
        broker: &BrokerInfo,
        security: &SecurityInfo,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<SessionHandle> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::session(SessionStage::Create, "MQTT client not initialized"));
        }
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(Error::session(SessionStage::Create, "a session already exists"));
        }
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        *slot = Some(Slot {
            handle,
            broker: broker.clone(),
            security: security.clone(),
            callback,
            buffer,
            client: None,
            events: None,
            closing: Arc::new(AtomicBool::new(false)),
            subscriptions: SubscriptionTracker::default(),
        });
        debug!("Created MQTT {} for {}", handle, broker);
        Ok(handle)
    }

    async fn connect(&self, handle: SessionHandle, client_id: &str) -> Result<()> {
        let (broker, security, buffer, callback) = self
            .with_slot(handle, |slot| {
                slot.stop_events();
                Ok((
                    slot.broker.clone(),
                    slot.security.clone(),
                    slot.buffer.clone(),
                    Arc::clone(&slot.callback),
                ))
            })
            .await?;
        let ca = read_ca(&broker, &security).await?;
        let options = mqtt_options(client_id, &broker, &security, &buffer, ca);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        await_connack(&mut eventloop, self.connect_timeout).await?;

        let closing = Arc::new(AtomicBool::new(false));
        let subscriptions = SubscriptionTracker::default();
        let events = tokio::spawn(forward_events(
            eventloop,
            handle,
            callback,
            Arc::clone(&closing),
            subscriptions.clone(),
        ));
        self.with_slot(handle, |slot| {
            slot.client = Some(client);
            slot.events = Some(events);
            slot.closing = closing;
            slot.subscriptions = subscriptions;
            Ok(())
        })
        .await?;
        info!("MQTT {} connected as '{}'", handle, client_id);
        Ok(())
    }

    async fn publish(
        &self,
        handle: SessionHandle,
        topic: &str,
        payload: Bytes,
        qos: Qos,
    ) -> Result<()> {
        let client = self
            .with_slot(handle, |slot| slot.client().cloned())
            .await?;
        client
            .publish_bytes(topic, to_qos(qos), false, payload)
            .await
            .map_err(|e| Error::publish_failed(topic, e.to_string()))
    }

    async fn subscribe(&self, handle: SessionHandle, topic: &str, qos: Qos) -> Result<()> {
        let (client, subscriptions) = self
            .with_slot(handle, |slot| {
                Ok((slot.client()?.clone(), slot.subscriptions.clone()))
            })
            .await?;
        subscriptions.requested(topic);
        client.subscribe(topic, to_qos(qos)).await.map_err(|e| {
            subscriptions.withdraw_last();
            Error::subscribe_failed(topic, e.to_string())
        })
    }

    async fn disconnect(&self, handle: SessionHandle) -> Result<()> {
        let client = self
            .with_slot(handle, |slot| {
                slot.closing.store(true, Ordering::SeqCst);
                Ok(slot.client.take())
            })
            .await?;
        if let Some(client) = client {
            // The event loop may already be gone if the broker dropped us.
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect request not delivered: {}", e);
            }
        }
        Ok(())
    }

    async fn delete(&self, handle: SessionHandle) -> Result<()> {
        self.with_slot(handle, |slot| {
            slot.stop_events();
            Ok(())
        })
        .await?;
        *self.slot.lock().await = None;
        debug!("Deleted MQTT {}", handle);
        Ok(())
    }

    async fn lib_deinit(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ignore;

    #[async_trait]
    impl SessionCallback for Ignore {
        async fn on_event(&self, _handle: SessionHandle, _event: SessionEvent) {}
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_qos(Qos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_qos(Qos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_mqtt_options() {
        let broker = BrokerInfo {
            host: "mqtt.local".into(),
            port: 1884,
            tls: false,
            keep_alive_secs: 30,
        };
        let security = SecurityInfo {
            username: Some("device".into()),
            password: Some("pw".into()),
            ca_path: None,
        };
        let buffer = NetworkBuffer::allocate(2048).unwrap();
        let options = mqtt_options("thermo-1", &broker, &security, &buffer, None);
        assert_eq!(options.client_id(), "thermo-1");
        assert_eq!(options.broker_address(), ("mqtt.local".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_suback_is_traced_to_its_topic() {
        let tracker = SubscriptionTracker::default();
        tracker.requested("thermostat/setpoint");
        tracker.requested("thermostat/schedule");
        tracker.requested("thermostat/dropped");
        tracker.withdraw_last();

        tracker.sent(7);
        tracker.sent(8);
        // Nothing left to pair with.
        tracker.sent(9);

        assert_eq!(tracker.acknowledged(8), "thermostat/schedule");
        assert_eq!(tracker.acknowledged(7), "thermostat/setpoint");
        assert_eq!(tracker.acknowledged(8), "<unknown, packet 8>");
        assert_eq!(tracker.acknowledged(9), "<unknown, packet 9>");
    }

    #[tokio::test]
    async fn test_ca_file_is_read_only_for_tls() {
        let security = SecurityInfo {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..SecurityInfo::default()
        };
        let plain = BrokerInfo::default();
        assert_eq!(read_ca(&plain, &security).await.unwrap(), None);

        let tls = BrokerInfo {
            tls: true,
            ..BrokerInfo::default()
        };
        assert!(matches!(read_ca(&tls, &security).await, Err(Error::Io(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, b"-----BEGIN CERTIFICATE-----").unwrap();
        let security = SecurityInfo {
            ca_path: Some(path),
            ..SecurityInfo::default()
        };
        assert_eq!(
            read_ca(&tls, &security).await.unwrap().as_deref(),
            Some(&b"-----BEGIN CERTIFICATE-----"[..])
        );
    }

    #[tokio::test]
    async fn test_tls_connect_fails_on_missing_ca_file() {
        let session = MqttSession::new(Duration::from_secs(1));
        session.lib_init().await.unwrap();
        let broker = BrokerInfo {
            host: "127.0.0.1".into(),
            port: 1,
            tls: true,
            ..BrokerInfo::default()
        };
        let security = SecurityInfo {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..SecurityInfo::default()
        };
        let handle = session
            .create(
                NetworkBuffer::allocate(1024).unwrap(),
                &broker,
                &security,
                Arc::new(Ignore),
            )
            .await
            .unwrap();
        assert!(matches!(
            session.connect(handle, "telelink-test").await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_init_and_single_session() {
        let session = MqttSession::new(Duration::from_secs(1));
        let buffer = NetworkBuffer::allocate(64).unwrap();
        let broker = BrokerInfo::default();
        let security = SecurityInfo::default();

        assert!(
            session
                .create(buffer.clone(), &broker, &security, Arc::new(Ignore))
                .await
                .is_err()
        );

        session.lib_init().await.unwrap();
        let handle = session
            .create(buffer.clone(), &broker, &security, Arc::new(Ignore))
            .await
            .unwrap();
        assert!(
            session
                .create(buffer, &broker, &security, Arc::new(Ignore))
                .await
                .is_err()
        );

        // Not connected yet.
        assert!(
            session
                .publish(handle, "t", Bytes::from_static(b"1"), Qos::AtMostOnce)
                .await
                .is_err()
        );
        session.disconnect(handle).await.unwrap();
        session.delete(handle).await.unwrap();
        assert!(session.delete(handle).await.is_err());
        session.lib_deinit().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        // Nothing listens on port 1 of loopback.
        let session = MqttSession::new(Duration::from_secs(2));
        session.lib_init().await.unwrap();
        let broker = BrokerInfo {
            host: "127.0.0.1".into(),
            port: 1,
            ..BrokerInfo::default()
        };
        let handle = session
            .create(
                NetworkBuffer::allocate(1024).unwrap(),
                &broker,
                &SecurityInfo::default(),
                Arc::new(Ignore),
            )
            .await
            .unwrap();

        let err = session.connect(handle, "telelink-test").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
