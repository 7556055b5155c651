//! Producer and consumer activities.
//!
//! Each activity is a tokio task with its own [`CancellationToken`]. Stopping
//! is cooperative: the token is cancelled and the task is awaited, so an
//! operation in flight finishes (or times out on its own) before the
//! activity is gone.

mod display;
mod publisher;
mod sampler;

pub use display::DisplayRefresher;
pub use publisher::Publisher;
pub use sampler::{SampleOutcome, Sampler};

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::events::{EventDispatcher, LifecycleEvent};

/// A running activity.
#[derive(Debug)]
pub struct ActivityHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ActivityHandle {
    /// Spawn `run` with a child of `parent`.
    pub fn spawn<F, Fut>(
        name: &'static str,
        parent: &CancellationToken,
        events: &EventDispatcher,
        run: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let task = tokio::spawn(run(token.clone()));
        debug!("Started activity '{}'", name);
        events.send(LifecycleEvent::ActivityStarted {
            name: name.to_string(),
        });
        Self { name, token, task }
    }

    /// Activity name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the task to return.
    pub async fn stop(self, events: &EventDispatcher) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Activity '{}' ended abnormally: {}", self.name, e);
        }
        debug!("Stopped activity '{}'", self.name);
        events.send(LifecycleEvent::ActivityStopped {
            name: self.name.to_string(),
        });
    }
}

/// The activities of one lifecycle, split by what they depend on.
#[derive(Debug, Default)]
pub struct Activities {
    /// Need a connected session (publisher).
    session_bound: Vec<ActivityHandle>,
    /// Run regardless of connectivity (sampler, display).
    local: Vec<ActivityHandle>,
}

impl Activities {
    /// Track an activity that needs the session.
    pub fn push_session_bound(&mut self, handle: ActivityHandle) {
        self.session_bound.push(handle);
    }

    /// Track an activity that runs without the session.
    pub fn push_local(&mut self, handle: ActivityHandle) {
        self.local.push(handle);
    }

    /// Names of running activities.
    pub fn names(&self) -> Vec<&'static str> {
        self.session_bound
            .iter()
            .chain(&self.local)
            .map(ActivityHandle::name)
            .collect()
    }

    /// Stop the session-bound activities, newest first.
    pub async fn stop_session_bound(&mut self, events: &EventDispatcher) {
        while let Some(handle) = self.session_bound.pop() {
            handle.stop(events).await;
        }
    }

    /// Stop the local activities, newest first.
    pub async fn stop_local(&mut self, events: &EventDispatcher) {
        while let Some(handle) = self.local.pop() {
            handle.stop(events).await;
        }
    }
}
