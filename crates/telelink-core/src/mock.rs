//! Mock collaborators for testing.
//!
//! Everything here implements the traits in [`crate::traits`] without any
//! network or hardware, records the calls it receives and can be told to
//! fail specific operations.
//!
//! # Features
//!
//! - **Failure injection**: fail an operation always or for the next N calls
//! - **Call log**: assert exactly which acquire/release calls happened
//! - **Event injection**: deliver session events from a separate task

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, SessionStage};
use crate::link::{Credentials, LinkConfig};
use crate::session::{
    BrokerInfo, InboundMessage, NetworkBuffer, Qos, SecurityInfo, SessionEvent, SessionHandle,
};
use crate::state::DisplayFrame;
use crate::traits::{
    DisplaySink, MessagingSession, SensorSource, SessionCallback, SubscriptionHandler,
    TransportLink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy)]
enum FaultMode {
    Always,
    Times(u32),
}

/// Which operations should fail, and for how long.
#[derive(Debug)]
struct FaultPlan<Op> {
    faults: Mutex<HashMap<Op, FaultMode>>,
}

impl<Op: Copy + Eq + Hash> FaultPlan<Op> {
    fn new() -> Self {
        Self {
            faults: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, op: Op, mode: Option<FaultMode>) {
        let mut faults = lock(&self.faults);
        match mode {
            Some(mode) => faults.insert(op, mode),
            None => faults.remove(&op),
        };
    }

    /// Consume one failure for `op`, if any is planned.
    fn trip(&self, op: Op) -> bool {
        let mut faults = lock(&self.faults);
        match faults.get(&op).copied() {
            Some(FaultMode::Always) => true,
            Some(FaultMode::Times(n)) if n > 1 => {
                faults.insert(op, FaultMode::Times(n - 1));
                true
            }
            Some(FaultMode::Times(1)) => {
                faults.remove(&op);
                true
            }
            _ => false,
        }
    }
}

/// Operations of [`MockLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOp {
    /// `init`
    Init,
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `deinit`
    Deinit,
}

/// A transport link that never leaves the process.
///
/// # Example
///
/// ```
/// use telelink_core::mock::{LinkOp, MockLink};
/// use telelink_core::{Credentials, TransportLink};
///
/// #[tokio::main]
/// async fn main() {
///     let link = MockLink::new();
///     link.fail_times(LinkOp::Connect, 1);
///
///     let credentials = Credentials::new("lab", "password");
///     assert!(link.connect(&credentials).await.is_err());
///     assert!(link.connect(&credentials).await.is_ok());
///     assert_eq!(link.count(LinkOp::Connect), 2);
/// }
/// ```
pub struct MockLink {
    address: IpAddr,
    initialized: AtomicBool,
    connected: AtomicBool,
    faults: FaultPlan<LinkOp>,
    calls: Mutex<Vec<LinkOp>>,
    connect_latency_ms: AtomicU64,
    report_down_once: AtomicBool,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("address", &self.address)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Create a link that succeeds at everything.
    pub fn new() -> Self {
        Self::with_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)))
    }

    /// Create a link that reports `address` once connected.
    pub fn with_address(address: IpAddr) -> Self {
        Self {
            address,
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            faults: FaultPlan::new(),
            calls: Mutex::new(Vec::new()),
            connect_latency_ms: AtomicU64::new(0),
            report_down_once: AtomicBool::new(false),
        }
    }

    /// Fail `op` on every call.
    pub fn fail_always(&self, op: LinkOp) {
        self.faults.set(op, Some(FaultMode::Always));
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_times(&self, op: LinkOp, count: u32) {
        let mode = (count > 0).then_some(FaultMode::Times(count));
        self.faults.set(op, mode);
    }

    /// Stop failing `op`.
    pub fn clear_fault(&self, op: LinkOp) {
        self.faults.set(op, None);
    }

    /// Delay each connect attempt.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Drop the link without anyone asking, as a lost access point would.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Report the link down on the next `is_connected` only, as a link
    /// manager that re-associates on its own would.
    pub fn report_down_once(&self) {
        self.report_down_once.store(true, Ordering::SeqCst);
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<LinkOp> {
        lock(&self.calls).clone()
    }

    /// Number of calls of `op`.
    pub fn count(&self, op: LinkOp) -> usize {
        lock(&self.calls).iter().filter(|c| **c == op).count()
    }

    /// Resources currently held: initialized manager plus live connection.
    pub fn held(&self) -> usize {
        usize::from(self.initialized.load(Ordering::SeqCst))
            + usize::from(self.connected.load(Ordering::SeqCst))
    }

    fn record(&self, op: LinkOp) -> Result<()> {
        lock(&self.calls).push(op);
        if self.faults.trip(op) {
            return Err(Error::link(format!("mock {:?} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportLink for MockLink {
    async fn init(&self, _config: &LinkConfig) -> Result<()> {
        self.record(LinkOp::Init)?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<IpAddr> {
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.record(LinkOp::Connect)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.address)
    }

    async fn is_connected(&self) -> bool {
        if self.report_down_once.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.connected.load(Ordering::SeqCst)
    }

    async fn address(&self) -> Option<IpAddr> {
        self.connected
            .load(Ordering::SeqCst)
            .then_some(self.address)
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(LinkOp::Disconnect)?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn deinit(&self) -> Result<()> {
        self.record(LinkOp::Deinit)?;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Operations of [`MockSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOp {
    /// `lib_init`
    LibInit,
    /// `create`
    Create,
    /// `connect`
    Connect,
    /// `publish`
    Publish,
    /// `subscribe`
    Subscribe,
    /// `disconnect`
    Disconnect,
    /// `delete`
    Delete,
    /// `lib_deinit`
    LibDeinit,
}

impl SessionOp {
    fn failure(self) -> Error {
        let stage = match self {
            SessionOp::LibInit | SessionOp::LibDeinit => SessionStage::LibraryInit,
            SessionOp::Create | SessionOp::Delete => SessionStage::Create,
            SessionOp::Connect | SessionOp::Disconnect => SessionStage::Connect,
            SessionOp::Publish => return Error::publish_failed("mock", "publish rejected"),
            SessionOp::Subscribe => return Error::subscribe_failed("mock", "subscribe rejected"),
        };
        Error::session(stage, format!("mock {:?} failure", self))
    }
}

/// A messaging session that never leaves the process.
pub struct MockSession {
    next_handle: AtomicU64,
    lib_initialized: AtomicBool,
    connected: AtomicBool,
    created: Mutex<Option<(SessionHandle, Arc<dyn SessionCallback>)>>,
    buffer: Mutex<Option<NetworkBuffer>>,
    faults: FaultPlan<SessionOp>,
    calls: Mutex<Vec<SessionOp>>,
    client_ids: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Bytes)>>,
    subscriptions: Mutex<Vec<String>>,
    connect_latency_ms: AtomicU64,
    subscribe_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("lib_initialized", &self.lib_initialized.load(Ordering::Relaxed))
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("handle", &self.handle())
            .finish()
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    /// Create a session that succeeds at everything.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            lib_initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            created: Mutex::new(None),
            buffer: Mutex::new(None),
            faults: FaultPlan::new(),
            calls: Mutex::new(Vec::new()),
            client_ids: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            connect_latency_ms: AtomicU64::new(0),
            subscribe_latency_ms: AtomicU64::new(0),
        }
    }

    /// Fail `op` on every call.
    pub fn fail_always(&self, op: SessionOp) {
        self.faults.set(op, Some(FaultMode::Always));
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_times(&self, op: SessionOp, count: u32) {
        let mode = (count > 0).then_some(FaultMode::Times(count));
        self.faults.set(op, mode);
    }

    /// Stop failing `op`.
    pub fn clear_fault(&self, op: SessionOp) {
        self.faults.set(op, None);
    }

    /// Delay each connect attempt.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delay each subscribe call.
    pub fn set_subscribe_latency(&self, latency: Duration) {
        self.subscribe_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Handle of the live session object, if any.
    pub fn handle(&self) -> Option<SessionHandle> {
        lock(&self.created).as_ref().map(|(handle, _)| *handle)
    }

    /// Deliver `event` to the registered callback from a separate task.
    ///
    /// Returns `None` if no session object exists.
    pub fn emit(&self, event: SessionEvent) -> Option<JoinHandle<()>> {
        let (handle, callback) = lock(&self.created).clone()?;
        if matches!(event, SessionEvent::Disconnected) {
            self.connected.store(false, Ordering::SeqCst);
        }
        Some(tokio::spawn(async move {
            callback.on_event(handle, event).await;
        }))
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<SessionOp> {
        lock(&self.calls).clone()
    }

    /// Number of calls of `op`.
    pub fn count(&self, op: SessionOp) -> usize {
        lock(&self.calls).iter().filter(|c| **c == op).count()
    }

    /// Client identifiers offered to `connect`, in order.
    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.client_ids).clone()
    }

    /// Successful publishes as `(topic, payload)`.
    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.published)
            .iter()
            .map(|(topic, payload)| (topic.clone(), String::from_utf8_lossy(payload).into_owned()))
            .collect()
    }

    /// Topics subscribed so far.
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    /// Resources currently held: library, session object and connection.
    pub fn held(&self) -> usize {
        usize::from(self.lib_initialized.load(Ordering::SeqCst))
            + usize::from(lock(&self.created).is_some())
            + usize::from(self.connected.load(Ordering::SeqCst))
    }

    fn record(&self, op: SessionOp) -> Result<()> {
        lock(&self.calls).push(op);
        if self.faults.trip(op) {
            return Err(op.failure());
        }
        Ok(())
    }

    fn check_handle(&self, handle: SessionHandle) -> Result<()> {
        if self.handle() == Some(handle) {
            Ok(())
        } else {
            Err(Error::session(
                SessionStage::Create,
                format!("unknown handle {}", handle),
            ))
        }
    }
}

#[async_trait]
impl MessagingSession for MockSession {
    async fn lib_init(&self) -> Result<()> {
        self.record(SessionOp::LibInit)?;
        self.lib_initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create(
        &self,
        buffer: NetworkBuffer,
        _broker: &BrokerInfo,
        _security: &SecurityInfo,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<SessionHandle> {
        self.record(SessionOp::Create)?;
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        *lock(&self.created) = Some((handle, callback));
        *lock(&self.buffer) = Some(buffer);
        Ok(handle)
    }

    async fn connect(&self, handle: SessionHandle, client_id: &str) -> Result<()> {
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        lock(&self.client_ids).push(client_id.to_string());
        self.record(SessionOp::Connect)?;
        self.check_handle(handle)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        handle: SessionHandle,
        topic: &str,
        payload: Bytes,
        _qos: Qos,
    ) -> Result<()> {
        self.record(SessionOp::Publish)?;
        self.check_handle(handle)?;
        lock(&self.published).push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, handle: SessionHandle, topic: &str, _qos: Qos) -> Result<()> {
        let latency = self.subscribe_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.record(SessionOp::Subscribe)?;
        self.check_handle(handle)?;
        lock(&self.subscriptions).push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self, handle: SessionHandle) -> Result<()> {
        self.record(SessionOp::Disconnect)?;
        self.check_handle(handle)?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, handle: SessionHandle) -> Result<()> {
        self.record(SessionOp::Delete)?;
        self.check_handle(handle)?;
        *lock(&self.created) = None;
        *lock(&self.buffer) = None;
        Ok(())
    }

    async fn lib_deinit(&self) -> Result<()> {
        self.record(SessionOp::LibDeinit)?;
        self.lib_initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A sensor that replays scripted readings, repeating the last one.
#[derive(Debug)]
pub struct MockSensor {
    readings: Mutex<VecDeque<f32>>,
    last: Mutex<f32>,
    should_fail: AtomicBool,
    read_count: AtomicU32,
}

impl MockSensor {
    /// Create a sensor that always reads `celsius`.
    pub fn new(celsius: f32) -> Self {
        Self::scripted([celsius])
    }

    /// Create a sensor that returns `readings` in order, then repeats the last.
    pub fn scripted(readings: impl IntoIterator<Item = f32>) -> Self {
        let readings: VecDeque<f32> = readings.into_iter().collect();
        let last = readings.front().copied().unwrap_or(20.0);
        Self {
            readings: Mutex::new(readings),
            last: Mutex::new(last),
            should_fail: AtomicBool::new(false),
            read_count: AtomicU32::new(0),
        }
    }

    /// Queue more readings.
    pub fn push(&self, celsius: f32) {
        lock(&self.readings).push_back(celsius);
    }

    /// Make reads fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Number of reads.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    async fn read_celsius(&self) -> Result<f32> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::Sensor("mock sensor failure".to_string()));
        }
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.readings).pop_front() {
            *last = next;
        }
        Ok(*last)
    }
}

/// A display that keeps every frame it is asked to draw.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    frames: Mutex<Vec<DisplayFrame>>,
    should_fail: AtomicBool,
}

impl RecordingDisplay {
    /// Create an empty display.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> Vec<DisplayFrame> {
        lock(&self.frames).clone()
    }

    /// Last frame drawn.
    pub fn last_frame(&self) -> Option<DisplayFrame> {
        lock(&self.frames).last().copied()
    }

    /// Make rendering fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DisplaySink for RecordingDisplay {
    async fn render(&self, frame: &DisplayFrame) -> Result<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::Display("mock display failure".to_string()));
        }
        lock(&self.frames).push(*frame);
        Ok(())
    }
}

/// A subscription handler that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<InboundMessage>>,
}

impl RecordingHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handled so far.
    pub fn messages(&self) -> Vec<InboundMessage> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl SubscriptionHandler for RecordingHandler {
    async fn on_message(&self, message: &InboundMessage) {
        lock(&self.messages).push(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_fault_plan() {
        let link = MockLink::new();
        link.fail_times(LinkOp::Connect, 2);
        let credentials = Credentials::new("lab", "pw");

        assert!(link.connect(&credentials).await.is_err());
        assert!(link.connect(&credentials).await.is_err());
        assert!(link.connect(&credentials).await.is_ok());
        assert!(link.is_connected().await);
        assert_eq!(link.count(LinkOp::Connect), 3);
        assert_eq!(link.held(), 1);
    }

    #[tokio::test]
    async fn test_link_drop() {
        let link = MockLink::new();
        link.connect(&Credentials::new("lab", "pw")).await.unwrap();
        link.drop_link();
        assert!(!link.is_connected().await);
        assert_eq!(link.address().await, None);
    }

    #[tokio::test]
    async fn test_session_failure_kinds() {
        let session = MockSession::new();
        session.fail_always(SessionOp::Connect);
        let err = session.connect(SessionHandle(1), "id").await.unwrap_err();
        assert!(err.is_retryable());

        session.fail_always(SessionOp::Create);
        let err = session
            .create(
                NetworkBuffer::allocate(16).unwrap(),
                &BrokerInfo::default(),
                &SecurityInfo::default(),
                Arc::new(RecordingHandlerCallback),
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_session_lifecycle_holds() {
        let session = MockSession::new();
        session.lib_init().await.unwrap();
        let handle = session
            .create(
                NetworkBuffer::allocate(16).unwrap(),
                &BrokerInfo::default(),
                &SecurityInfo::default(),
                Arc::new(RecordingHandlerCallback),
            )
            .await
            .unwrap();
        session.connect(handle, "thermo-1").await.unwrap();
        assert_eq!(session.held(), 3);

        session
            .publish(handle, "t", Bytes::from_static(b"70"), Qos::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(session.published(), vec![("t".to_string(), "70".to_string())]);

        session.disconnect(handle).await.unwrap();
        session.delete(handle).await.unwrap();
        session.lib_deinit().await.unwrap();
        assert_eq!(session.held(), 0);
        assert!(session.emit(SessionEvent::Disconnected).is_none());
    }

    #[tokio::test]
    async fn test_sensor_script_repeats_last() {
        let sensor = MockSensor::scripted([20.0, 21.0]);
        assert_eq!(sensor.read_celsius().await.unwrap(), 20.0);
        assert_eq!(sensor.read_celsius().await.unwrap(), 21.0);
        assert_eq!(sensor.read_celsius().await.unwrap(), 21.0);
        assert_eq!(sensor.read_count(), 3);

        sensor.set_should_fail(true);
        assert!(sensor.read_celsius().await.is_err());
    }

    struct RecordingHandlerCallback;

    #[async_trait]
    impl SessionCallback for RecordingHandlerCallback {
        async fn on_event(&self, _handle: SessionHandle, _event: SessionEvent) {}
    }
}
