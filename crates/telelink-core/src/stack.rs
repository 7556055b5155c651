//! Ordered bring-up and ledger-driven teardown of the connectivity stack.
//!
//! Acquisition order:
//!
//! ```text
//! link init -> link connect -> library init -> buffer -> session create
//!     -> client identifier -> session connect
//! ```
//!
//! Every successful acquire is recorded in the [`ResourceLedger`] before the
//! next step starts. Release walks the ledger in reverse and nothing else, so
//! a failure anywhere unwinds exactly what was acquired.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{LinkOptions, SessionOptions};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, LifecycleEvent};
use crate::ledger::{ResourceLedger, Stage};
use crate::retry::with_retry;
use crate::session::{NetworkBuffer, SessionHandle};
use crate::traits::{MessagingSession, SessionCallback, TransportLink};
use crate::util::create_client_identifier;

/// Outcome of a teardown pass.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Stages released, in release order.
    pub released: Vec<Stage>,
    /// Stages whose release call failed; they remain in the ledger.
    pub failed: Vec<(Stage, Error)>,
}

impl TeardownReport {
    /// Whether every recorded stage was released.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owner of the link, the session and the ledger that tracks them.
pub struct ConnectivityStack {
    link: Arc<dyn TransportLink>,
    session: Arc<dyn MessagingSession>,
    ledger: ResourceLedger,
    ledger_tx: watch::Sender<ResourceLedger>,
    buffer: Option<NetworkBuffer>,
    handle: Option<SessionHandle>,
    events: EventDispatcher,
}

impl ConnectivityStack {
    /// Create a stack with an empty ledger.
    pub fn new(
        link: Arc<dyn TransportLink>,
        session: Arc<dyn MessagingSession>,
        events: EventDispatcher,
    ) -> Self {
        let (ledger_tx, _) = watch::channel(ResourceLedger::new());
        Self {
            link,
            session,
            ledger: ResourceLedger::new(),
            ledger_tx,
            buffer: None,
            handle: None,
            events,
        }
    }

    /// Current ledger.
    pub fn ledger(&self) -> ResourceLedger {
        self.ledger
    }

    /// Watch the ledger change over time.
    pub fn observe_ledger(&self) -> watch::Receiver<ResourceLedger> {
        self.ledger_tx.subscribe()
    }

    /// Handle of the created session, if any.
    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    /// The messaging session collaborator.
    pub fn session(&self) -> Arc<dyn MessagingSession> {
        Arc::clone(&self.session)
    }

    fn record_acquired(&mut self, stage: Stage) {
        if self.ledger.insert(stage) {
            debug!("Acquired {}", stage);
            self.ledger_tx.send_replace(self.ledger);
            self.events.send(LifecycleEvent::StageAcquired { stage });
        }
    }

    fn record_released(&mut self, stage: Stage) {
        if self.ledger.remove(stage) {
            debug!("Released {}", stage);
            self.ledger_tx.send_replace(self.ledger);
            self.events.send(LifecycleEvent::StageReleased { stage });
        }
    }

    /// Initialize the link manager. A no-op if already initialized.
    pub async fn init_link(&mut self, options: &LinkOptions) -> Result<()> {
        if self.ledger.contains(Stage::LinkManagerInitialized) {
            return Ok(());
        }
        self.link
            .init(&options.config)
            .await
            .map_err(|e| Error::stage_failed(Stage::LinkManagerInitialized, e))?;
        self.record_acquired(Stage::LinkManagerInitialized);
        Ok(())
    }

    /// Bring the link up, retrying per `options.retry`.
    ///
    /// If the link already reports connected, returns its address without
    /// another connect call.
    pub async fn connect_link(&mut self, options: &LinkOptions) -> Result<IpAddr> {
        if self.link.is_connected().await
            && let Some(address) = self.link.address().await
        {
            debug!("Link already up at {}", address);
            // A link that came back on its own is still ours to release.
            self.record_acquired(Stage::LinkConnected);
            return Ok(address);
        }

        info!("Connecting link to '{}'", options.credentials.ssid);
        let link = Arc::clone(&self.link);
        let events = self.events.clone();
        let max_attempts = options.retry.max_attempts.max(1);
        let credentials = &options.credentials;

        let address = with_retry(&options.retry, "Link connect", |attempt| {
            let link = Arc::clone(&link);
            let events = events.clone();
            async move {
                link.connect(credentials).await.inspect_err(|e| {
                    events.send(LifecycleEvent::AttemptFailed {
                        operation: "link_connect".to_string(),
                        attempt,
                        max_attempts,
                        error: e.to_string(),
                    });
                })
            }
        })
        .await
        .map_err(|e| {
            e.into_error(|attempts, last| Error::TransportExhausted { attempts, last })
        })?;

        self.record_acquired(Stage::LinkConnected);
        info!("Link up at {}", address);
        Ok(address)
    }

    /// Bring the messaging session up on an already connected link.
    ///
    /// Stages already in the ledger are skipped.
    pub async fn bring_up_session(
        &mut self,
        link_options: &LinkOptions,
        options: &SessionOptions,
        callback: Arc<dyn SessionCallback>,
    ) -> Result<SessionHandle> {
        if !self.ledger.contains(Stage::MessagingLibraryInitialized) {
            self.session
                .lib_init()
                .await
                .map_err(|e| Error::stage_failed(Stage::MessagingLibraryInitialized, e))?;
            self.record_acquired(Stage::MessagingLibraryInitialized);
        }

        let buffer = match &self.buffer {
            Some(buffer) => buffer.clone(),
            None => {
                let buffer = NetworkBuffer::allocate(options.buffer_size)
                    .map_err(|e| Error::stage_failed(Stage::BufferAllocated, e))?;
                self.buffer = Some(buffer.clone());
                self.record_acquired(Stage::BufferAllocated);
                buffer
            }
        };

        let handle = match self.handle {
            Some(handle) => handle,
            None => {
                let handle = self
                    .session
                    .create(buffer, &options.broker, &options.security, callback)
                    .await
                    .map_err(|e| Error::stage_failed(Stage::SessionCreated, e))?;
                self.handle = Some(handle);
                self.record_acquired(Stage::SessionCreated);
                handle
            }
        };

        let client_id =
            create_client_identifier(&options.identifier_prefix, options.identifier_max_len)?;
        self.connect_session(handle, &client_id, link_options, options)
            .await?;
        Ok(handle)
    }

    /// Session connect with the link re-checked before every attempt.
    ///
    /// A link found down is dropped from the ledger and reconnected under
    /// its own policy; exhausting that ends the session attempt too.
    async fn connect_session(
        &mut self,
        handle: SessionHandle,
        client_id: &str,
        link_options: &LinkOptions,
        options: &SessionOptions,
    ) -> Result<()> {
        info!("Connecting '{}' to broker {}", client_id, options.broker);
        let max_attempts = options.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if !self.link.is_connected().await {
                warn!("Link is down; re-establishing before session connect");
                if self.ledger.remove(Stage::LinkConnected) {
                    self.ledger_tx.send_replace(self.ledger);
                    self.events.send(LifecycleEvent::LinkLost);
                }
                self.connect_link(link_options).await?;
            }

            let e = match self.session.connect(handle, client_id).await {
                Ok(()) => {
                    self.record_acquired(Stage::SessionConnected);
                    info!("Session {} connected as '{}'", handle, client_id);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    return Err(Error::stage_failed(Stage::SessionConnected, e));
                }
                Err(e) => e,
            };

            self.events.send(LifecycleEvent::AttemptFailed {
                operation: "session_connect".to_string(),
                attempt,
                max_attempts,
                error: e.to_string(),
            });
            if attempt >= max_attempts {
                warn!(
                    "Session connect failed on final attempt {}/{}: {}",
                    attempt, max_attempts, e
                );
                return Err(Error::SessionExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            warn!(
                "Session connect failed ({}). Retrying in {:?}. Attempts left: {}",
                e,
                options.retry.interval,
                max_attempts - attempt
            );
            sleep(options.retry.interval).await;
            attempt += 1;
        }
    }

    /// Release every recorded stage in reverse acquisition order.
    ///
    /// A failed release is logged, left in the ledger and does not stop the
    /// remaining releases.
    pub async fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let pending = self.ledger.pending_releases();
        if pending.is_empty() {
            return report;
        }
        info!("Tearing down {:?}", self.ledger);

        for stage in pending {
            match self.release(stage).await {
                Ok(()) => report.released.push(stage),
                Err(e) => {
                    error!("Failed to release {}: {}", stage, e);
                    self.events.send(LifecycleEvent::ReleaseFailed {
                        stage,
                        error: e.to_string(),
                    });
                    report.failed.push((stage, e));
                }
            }
        }
        report
    }

    async fn release(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::SessionConnected => {
                if let Some(handle) = self.handle {
                    self.session.disconnect(handle).await?;
                }
            }
            Stage::SessionCreated => {
                if let Some(handle) = self.handle {
                    self.session.delete(handle).await?;
                }
                self.handle = None;
            }
            Stage::BufferAllocated => {
                self.buffer = None;
            }
            Stage::MessagingLibraryInitialized => self.session.lib_deinit().await?,
            Stage::LinkConnected => self.link.disconnect().await?,
            Stage::LinkManagerInitialized => self.link.deinit().await?,
        }
        self.record_released(stage);
        Ok(())
    }
}

impl std::fmt::Debug for ConnectivityStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityStack")
            .field("ledger", &self.ledger)
            .field("handle", &self.handle)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}
