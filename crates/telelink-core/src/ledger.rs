//! Resource acquisition ledger.
//!
//! The ledger records which bring-up stages have been acquired and not yet
//! released. Teardown consults nothing else: whatever failed and wherever it
//! failed, releasing exactly the recorded stages in [`Stage::RELEASE_ORDER`]
//! unwinds the stack without leaking or double-releasing anything.
//!
//! Invariant: a stage is present if and only if its acquire call returned
//! success and no matching release call has succeeded since.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One acquisition stage of the connectivity stack, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Link manager initialized.
    LinkManagerInitialized,
    /// Link connected and addressed.
    LinkConnected,
    /// Messaging library initialized (process-wide).
    MessagingLibraryInitialized,
    /// Send/receive buffer allocated.
    BufferAllocated,
    /// Session object created.
    SessionCreated,
    /// Session connected to the broker.
    SessionConnected,
}

impl Stage {
    /// All stages in acquisition order.
    pub const ACQUIRE_ORDER: [Stage; 6] = [
        Stage::LinkManagerInitialized,
        Stage::LinkConnected,
        Stage::MessagingLibraryInitialized,
        Stage::BufferAllocated,
        Stage::SessionCreated,
        Stage::SessionConnected,
    ];

    /// All stages in reverse dependency order, the order teardown releases them.
    pub const RELEASE_ORDER: [Stage; 6] = [
        Stage::SessionConnected,
        Stage::SessionCreated,
        Stage::BufferAllocated,
        Stage::MessagingLibraryInitialized,
        Stage::LinkConnected,
        Stage::LinkManagerInitialized,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Stable kebab-case name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::LinkManagerInitialized => "link-manager-initialized",
            Stage::LinkConnected => "link-connected",
            Stage::MessagingLibraryInitialized => "messaging-library-initialized",
            Stage::BufferAllocated => "buffer-allocated",
            Stage::SessionCreated => "session-created",
            Stage::SessionConnected => "session-connected",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed set of acquired stages.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLedger {
    acquired: u8,
}

impl ResourceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a stage was acquired.
    ///
    /// Returns `false` if the stage was already recorded.
    pub fn insert(&mut self, stage: Stage) -> bool {
        let was_present = self.contains(stage);
        self.acquired |= stage.bit();
        !was_present
    }

    /// Record that a stage was released.
    ///
    /// Returns `false` if the stage was not recorded.
    pub fn remove(&mut self, stage: Stage) -> bool {
        let was_present = self.contains(stage);
        self.acquired &= !stage.bit();
        was_present
    }

    /// Check whether a stage is recorded.
    pub fn contains(&self, stage: Stage) -> bool {
        self.acquired & stage.bit() != 0
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.acquired == 0
    }

    /// Number of held stages.
    pub fn len(&self) -> usize {
        self.acquired.count_ones() as usize
    }

    /// Held stages in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ACQUIRE_ORDER
            .into_iter()
            .filter(move |stage| self.contains(*stage))
    }

    /// Held stages in the order teardown releases them.
    pub fn pending_releases(&self) -> Vec<Stage> {
        Stage::RELEASE_ORDER
            .into_iter()
            .filter(|stage| self.contains(*stage))
            .collect()
    }

    /// Forget every stage. Used only when the controller exits.
    pub fn clear(&mut self) {
        self.acquired = 0;
    }
}

impl fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Stage> for ResourceLedger {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut ledger = ResourceLedger::new();
        for stage in iter {
            ledger.insert(stage);
        }
        ledger
    }
}
