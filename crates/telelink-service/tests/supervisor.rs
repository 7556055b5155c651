//! Restart policy tests against the core mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use telelink_core::mock::{LinkOp, MockLink, MockSensor, MockSession, RecordingDisplay};
use telelink_core::{
    ConnectivityState, Credentials, Error, EventReceiver, ExitReason, InboundMessage,
    LifecycleEvent, RetryPolicy, SessionEvent,
};
use telelink_service::{Config, Supervisor};

struct Harness {
    link: Arc<MockLink>,
    session: Arc<MockSession>,
    config: Config,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.lifecycle.link.credentials = Credentials::new("lab", "password");
        config.lifecycle.link.retry = RetryPolicy::new(2, Duration::from_millis(50));
        config.lifecycle.session.retry = RetryPolicy::new(2, Duration::from_millis(50));
        config.lifecycle.activities.sample_period = Duration::from_millis(100);
        config.restart.delay = Duration::from_millis(500);

        Self {
            link: Arc::new(MockLink::new()),
            session: Arc::new(MockSession::new()),
            config,
        }
    }

    fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            self.config.clone(),
            self.link.clone(),
            self.session.clone(),
            Arc::new(MockSensor::new(21.1)),
            Arc::new(RecordingDisplay::new()),
        )
    }
}

async fn session_up(events: &mut EventReceiver) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::StateChanged {
                to: ConnectivityState::SessionUp,
                ..
            }) => return,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended: {}", e),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_restarts_until_budget_spent() {
    let mut h = Harness::new();
    h.config.restart.max_restarts = Some(1);

    let supervisor = Arc::new(h.supervisor());
    let mut events = supervisor.events().subscribe();
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    session_up(&mut events).await;
    h.session.emit(SessionEvent::Disconnected).unwrap();
    session_up(&mut events).await;
    h.session.emit(SessionEvent::Disconnected).unwrap();

    let report = run.await.unwrap();
    assert_eq!(report.lifecycles, 2);
    assert_eq!(report.last.unwrap(), ExitReason::SessionLost);
    assert_eq!(h.link.count(LinkOp::Connect), 2);
    assert_eq!(h.link.held(), 0);
    assert_eq!(h.session.held(), 0);

    let ids = h.session.client_ids();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test(start_paused = true)]
async fn test_setpoint_survives_restart() {
    let h = Harness::new();
    let supervisor = Arc::new(h.supervisor());
    let state = supervisor.state();
    let mut events = supervisor.events().subscribe();
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    session_up(&mut events).await;
    h.session
        .emit(SessionEvent::MessageReceived(InboundMessage::new(
            "thermostat/setpoint",
            "74",
        )))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(state.setpoint.get().await, 74);

    h.session.emit(SessionEvent::Disconnected).unwrap();
    session_up(&mut events).await;
    assert_eq!(state.setpoint.get().await, 74);

    supervisor.shutdown_token().cancel();
    let report = run.await.unwrap();
    assert!(report.is_shutdown());
    assert_eq!(report.lifecycles, 2);
    assert_eq!(h.link.held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_restart_when_disabled() {
    let mut h = Harness::new();
    h.config.restart.enabled = false;
    h.link.fail_always(LinkOp::Connect);

    let report = h.supervisor().run().await;
    assert_eq!(report.lifecycles, 1);
    assert!(matches!(
        report.last,
        Err(Error::TransportExhausted { attempts: 2, .. })
    ));
    assert_eq!(h.link.count(LinkOp::Connect), 2);
    assert_eq!(h.link.held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_restarts_runs_once() {
    let mut h = Harness::new();
    h.config.restart.max_restarts = Some(0);
    h.link.fail_always(LinkOp::Connect);

    let report = h.supervisor().run().await;
    assert_eq!(report.lifecycles, 1);
    assert!(report.last.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_restart_delay() {
    let mut h = Harness::new();
    h.config.restart.delay = Duration::from_secs(3600);
    h.link.fail_always(LinkOp::Connect);

    let supervisor = Arc::new(h.supervisor());
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    // Two 50ms attempts, then the long wait.
    tokio::time::sleep(Duration::from_secs(1)).await;
    supervisor.shutdown_token().cancel();

    let report = run.await.unwrap();
    assert_eq!(report.lifecycles, 1);
    assert!(report.is_shutdown());
}

#[tokio::test]
async fn test_invalid_lifecycle_config_is_not_retried() {
    let mut h = Harness::new();
    h.config.lifecycle.link.credentials = Credentials::default();

    let report = h.supervisor().run().await;
    assert_eq!(report.lifecycles, 0);
    assert!(matches!(report.last, Err(Error::InvalidConfig(_))));
    assert_eq!(h.link.count(LinkOp::Init), 0);
}
