//! Time checkpoint store
//!
//! Four timestamps govern which contacts count as new or recent:
//!
//! | Checkpoint        | Advanced when                                 |
//! |-------------------|-----------------------------------------------|
//! | `last_checked`    | every completed check                         |
//! | `last_updated`    | a check found at least one new contact        |
//! | `last_opened`     | the app leaves the foreground                 |
//! | `last_opened_old` | a check found new contacts (copy of `last_opened`) |
//!
//! `last_opened_old` lags on purpose: backgrounding and reopening the app
//! without any new contact must not shrink the recency window.
//!
//! [`CheckpointSet`] is a plain value; its fields can only change through the
//! named transitions, and [`CheckpointStore`] is the single owner that applies
//! them and persists the result.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::persistence::CheckpointPersistence;
use crate::types::Timestamp;

// ─── Clock ────────────────────────────────────────────────────

/// Source of "now" for checkpoint transitions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn set(&self, at: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── CheckpointSet ────────────────────────────────────────────

/// The four checkpoints. Unset means "beginning of time" for comparisons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSet {
    last_checked: Option<Timestamp>,
    last_updated: Option<Timestamp>,
    last_opened: Option<Timestamp>,
    last_opened_old: Option<Timestamp>,
}

impl CheckpointSet {
    /// Rebuild a set from durable values.
    pub fn restore(
        last_checked: Option<Timestamp>,
        last_updated: Option<Timestamp>,
        last_opened: Option<Timestamp>,
        last_opened_old: Option<Timestamp>,
    ) -> Self {
        Self {
            last_checked,
            last_updated,
            last_opened,
            last_opened_old,
        }
    }

    pub fn last_checked(&self) -> Option<Timestamp> {
        self.last_checked
    }

    pub fn last_updated(&self) -> Option<Timestamp> {
        self.last_updated
    }

    pub fn last_opened(&self) -> Option<Timestamp> {
        self.last_opened
    }

    pub fn last_opened_old(&self) -> Option<Timestamp> {
        self.last_opened_old
    }

    /// A check ran, whatever it found.
    #[must_use]
    pub fn with_check(mut self, now: Timestamp) -> Self {
        self.last_checked = Some(now);
        self
    }

    /// A check found new contacts: stamp `last_updated` and pull the lagging
    /// `last_opened_old` up to the current `last_opened`.
    ///
    /// `last_opened_old` never moves backwards.
    #[must_use]
    pub fn with_new_contacts_found(mut self, at: Timestamp) -> Self {
        self.last_updated = Some(at);
        self.last_opened_old = match (self.last_opened_old, self.last_opened) {
            (Some(old), Some(opened)) => Some(old.max(opened)),
            (old, opened) => opened.or(old),
        };
        self
    }

    /// The app left the foreground. Leaves `last_opened_old` alone.
    #[must_use]
    pub fn with_app_backgrounded(mut self, now: Timestamp) -> Self {
        self.last_opened = Some(now);
        self
    }
}

// ─── CheckpointStore ──────────────────────────────────────────

/// Sole owner of the durable checkpoints.
///
/// The in-memory value is authoritative; a failed save is logged and does not
/// roll the update back.
pub struct CheckpointStore {
    current: Mutex<CheckpointSet>,
    persistence: Arc<dyn CheckpointPersistence>,
    clock: Arc<dyn Clock>,
}

impl CheckpointStore {
    /// Load the persisted checkpoints.
    pub async fn open(
        persistence: Arc<dyn CheckpointPersistence>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let loaded = persistence.load().await?;
        tracing::debug!(checkpoints = ?loaded, "Checkpoints loaded");
        Ok(Self {
            current: Mutex::new(loaded),
            persistence,
            clock,
        })
    }

    pub async fn current(&self) -> CheckpointSet {
        *self.current.lock().await
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Set `last_checked = now`.
    pub async fn record_check(&self) -> CheckpointSet {
        let now = self.clock.now();
        self.apply(|set| set.with_check(now)).await
    }

    /// Set `last_updated = at` and `last_opened_old = last_opened`.
    pub async fn record_new_contacts_found(&self, at: Timestamp) -> CheckpointSet {
        self.apply(|set| set.with_new_contacts_found(at)).await
    }

    /// Set `last_opened = now`.
    pub async fn record_app_backgrounded(&self) -> CheckpointSet {
        let now = self.clock.now();
        self.apply(|set| set.with_app_backgrounded(now)).await
    }

    /// Apply the completion of a check as one update: `record_check`, plus
    /// `record_new_contacts_found` when anything new was reported.
    ///
    /// `checked_at` is when the listing was requested, not when the check
    /// completes; contacts created while the listing was in flight must still
    /// count as new on the next check.
    pub async fn commit_check(&self, found_new: bool, checked_at: Timestamp) -> CheckpointSet {
        self.apply(|set| {
            let set = set.with_check(checked_at);
            if found_new {
                set.with_new_contacts_found(checked_at)
            } else {
                set
            }
        })
        .await
    }

    async fn apply(&self, transition: impl FnOnce(CheckpointSet) -> CheckpointSet) -> CheckpointSet {
        let mut current = self.current.lock().await;
        let next = transition(*current);
        *current = next;

        if let Err(e) = self.persistence.save(&next).await {
            tracing::warn!(error = %e, "Failed to persist checkpoints");
        }

        next
    }
}
