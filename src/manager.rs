//! ContactsManager: check-and-notify cycle plus contact mutations.
//!
//! ## Check state machine
//!
//! ```text
//! Idle → Fetching → Reconciling → Completing → Idle
//!           │            │
//!           └── failure / cancellation: back to Idle, checkpoints untouched
//! ```
//!
//! Only one check runs at a time. A check requested while one is in flight is
//! coalesced onto it (the caller gets the running check's result) or rejected
//! with `CheckAlreadyInProgress`, per [`InflightPolicy`]. When the running
//! check is cancelled through its own signal, coalesced callers run a fresh
//! check instead of inheriting the cancellation.
//!
//! ## Single writer
//!
//! The published [`ContactViews`] sit behind one `RwLock`. The Reconciling and
//! Completing phases hold its write side, and so do deletions, so a deletion
//! can never interleave with view derivation. Deletions that land while a check
//! is still Fetching are recorded as tombstones and applied when that check
//! reconciles.
//!
//! Cancel a check through its cancel signal, not by dropping its future.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::checkpoint::{CheckpointSet, CheckpointStore, Clock, SystemClock};
use crate::config::{InflightPolicy, ReconConfig};
use crate::duplicates::{find_duplicates, DuplicateClusters};
use crate::error::{ReconError, Result};
use crate::events::ManagerEvent;
use crate::persistence::CheckpointPersistence;
use crate::person::Person;
use crate::slices::{derive_slices, Slices};
use crate::snapshot::{build_snapshot, Snapshot};
use crate::source::ContactSource;
use crate::types::ContactId;

/// Capacity of the host event broadcast.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ─── Phase ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckPhase {
    Idle,
    Fetching,
    Reconciling,
    Completing,
}

// ─── Views ────────────────────────────────────────────────────

/// Everything derived from one snapshot, published atomically.
#[derive(Debug, Clone, Default)]
pub struct ContactViews {
    snapshot: Snapshot,
    /// Checkpoints the slices were derived against (pre-check values).
    basis: CheckpointSet,
    slices: Slices,
    duplicates: DuplicateClusters,
}

impl ContactViews {
    /// Run the pure reconciliation pipeline over `snapshot`.
    pub fn compute(snapshot: Snapshot, basis: CheckpointSet, config: &ReconConfig) -> Self {
        let duplicates = if config.find_duplicates {
            find_duplicates(snapshot.persons())
        } else {
            DuplicateClusters::default()
        };
        let slices = derive_slices(
            snapshot.persons(),
            &basis,
            config.find_duplicates.then_some(&duplicates),
        );
        Self {
            snapshot,
            basis,
            slices,
            duplicates,
        }
    }

    /// Views with raw records removed, re-derived against the same basis.
    pub fn without(&self, removed: &HashSet<ContactId>, config: &ReconConfig) -> Self {
        Self::compute(self.snapshot.without(removed), self.basis, config)
    }

    pub fn all_contacts(&self) -> &[Person] {
        self.snapshot.persons()
    }

    pub fn recent_contacts(&self) -> &[Person] {
        &self.slices.recent
    }

    pub fn new_contacts_since_last_check(&self) -> &[Person] {
        &self.slices.new_since_last_check
    }

    pub fn duplicated_contacts(&self) -> &DuplicateClusters {
        &self.duplicates
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn basis(&self) -> CheckpointSet {
        self.basis
    }
}

/// Outcome of one completed check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub run_id: Uuid,
    pub new_contacts: Vec<Person>,
    /// Checkpoints after the check was committed.
    pub checkpoints: CheckpointSet,
}

// ─── Manager ──────────────────────────────────────────────────

struct ManagerState {
    views: Arc<ContactViews>,
    ready: bool,
    fetch_in_flight: bool,
    tombstones: HashSet<ContactId>,
}

type Waiter = oneshot::Sender<Result<Arc<CheckReport>>>;

pub struct ContactsManager {
    source: Arc<dyn ContactSource>,
    checkpoints: CheckpointStore,
    config: ReconConfig,
    state: RwLock<ManagerState>,
    /// `Some` while a check is in flight; holds coalesced waiters.
    inflight: std::sync::Mutex<Option<Vec<Waiter>>>,
    phase: watch::Sender<CheckPhase>,
    events: broadcast::Sender<ManagerEvent>,
}

impl ContactsManager {
    /// Open a manager using the wall clock.
    pub async fn open(
        source: Arc<dyn ContactSource>,
        persistence: Arc<dyn CheckpointPersistence>,
        config: ReconConfig,
    ) -> Result<Self> {
        Self::open_with_clock(source, persistence, Arc::new(SystemClock), config).await
    }

    pub async fn open_with_clock(
        source: Arc<dyn ContactSource>,
        persistence: Arc<dyn CheckpointPersistence>,
        clock: Arc<dyn Clock>,
        config: ReconConfig,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::open(persistence, clock).await?;
        let (phase, _) = watch::channel(CheckPhase::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            source,
            checkpoints,
            config,
            state: RwLock::new(ManagerState {
                views: Arc::new(ContactViews::default()),
                ready: false,
                fetch_in_flight: false,
                tombstones: HashSet::new(),
            }),
            inflight: std::sync::Mutex::new(None),
            phase,
            events,
        })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    // ── Read side ──

    /// The views published by the last completed check (or mutation).
    pub async fn views(&self) -> Arc<ContactViews> {
        self.state.read().await.views.clone()
    }

    pub async fn all_contacts(&self) -> Vec<Person> {
        self.views().await.all_contacts().to_vec()
    }

    pub async fn recent_contacts(&self) -> Vec<Person> {
        self.views().await.recent_contacts().to_vec()
    }

    pub async fn new_contacts_since_last_check(&self) -> Vec<Person> {
        self.views().await.new_contacts_since_last_check().to_vec()
    }

    pub async fn duplicated_contacts(&self) -> DuplicateClusters {
        self.views().await.duplicated_contacts().clone()
    }

    pub async fn checkpoints(&self) -> CheckpointSet {
        self.checkpoints.current().await
    }

    pub fn phase(&self) -> CheckPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CheckPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    // ── Lifecycle ──

    /// The app left the foreground.
    pub async fn record_app_backgrounded(&self) -> CheckpointSet {
        let set = self.checkpoints.record_app_backgrounded().await;
        tracing::debug!(last_opened = ?set.last_opened(), "App backgrounded");
        set
    }

    // ── Check ──

    /// Run (or join) a full check cycle.
    pub async fn check_new_contacts(&self) -> Result<Arc<CheckReport>> {
        self.check(None).await
    }

    /// Like [`Self::check_new_contacts`], aborting when `cancel` turns true.
    ///
    /// Cancellation during Fetching aborts with [`ReconError::Cancelled`] and
    /// leaves checkpoints untouched; so does cancellation observed before the
    /// Completing phase starts. Completing itself is never interrupted.
    pub async fn check_new_contacts_cancellable(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> Result<Arc<CheckReport>> {
        self.check(Some(cancel)).await
    }

    /// Spawn a check on the runtime.
    pub fn spawn_check(self: &Arc<Self>) -> JoinHandle<Result<Arc<CheckReport>>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.check_new_contacts().await })
    }

    /// Spawn a check and hand the new-contacts slice (or the failure) to
    /// `completion`. A cancelled check never calls `completion`.
    pub fn check_new_contacts_and_notify<F>(
        self: &Arc<Self>,
        cancel: Option<watch::Receiver<bool>>,
        completion: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<Vec<Person>>) + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.check(cancel).await {
                Err(ReconError::Cancelled) => {
                    tracing::debug!("Check cancelled; completion not called");
                }
                result => completion(result.map(|report| report.new_contacts.clone())),
            }
        })
    }

    /// Run a check for every change the source announces, until `shutdown`.
    pub async fn watch_source_changes(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.source.subscribe_changes();
        tracing::info!("Contact change listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        tracing::debug!(sequence = change.sequence, "Contact source changed");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change listener lagged; checking once");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Contact source change stream closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    tracing::info!("Contact change listener shutting down");
                    break;
                }
            }

            if let Err(e) = self.check(None).await {
                tracing::warn!(error = %e, "Change-triggered check failed");
            }
        }

        tracing::info!("Contact change listener stopped");
    }

    async fn check(&self, mut cancel: Option<watch::Receiver<bool>>) -> Result<Arc<CheckReport>> {
        loop {
            let waiter = {
                let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
                match inflight.as_mut() {
                    Some(waiters) => match self.config.inflight_policy {
                        InflightPolicy::Reject => return Err(ReconError::CheckAlreadyInProgress),
                        InflightPolicy::Coalesce => {
                            let (tx, rx) = oneshot::channel();
                            waiters.push(tx);
                            Some(rx)
                        }
                    },
                    None => {
                        *inflight = Some(Vec::new());
                        None
                    }
                }
            };

            let Some(rx) = waiter else {
                break;
            };

            tracing::debug!("Check coalesced onto in-flight run");
            let shared = match cancel.as_mut() {
                Some(cancel) => tokio::select! {
                    shared = rx => shared,
                    _ = cancelled(cancel) => return Err(ReconError::Cancelled),
                },
                None => rx.await,
            };

            match shared {
                Ok(Err(ReconError::Cancelled)) | Err(_) => {
                    // The leader's cancellation is not ours; run the check ourselves
                    tracing::debug!("In-flight check was cancelled; retrying as leader");
                }
                Ok(result) => return result,
            }
        }

        let guard = InflightGuard {
            manager: self,
            released: false,
        };
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("contact_check", %run_id);
        let result = self.run_cycle(run_id, cancel).instrument(span).await;
        guard.finish(&result);
        result
    }

    async fn run_cycle(
        &self,
        run_id: Uuid,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Arc<CheckReport>> {
        // ── Fetching ──
        self.set_phase(CheckPhase::Fetching);
        // Stamped before the listing so records created mid-fetch stay new
        let checked_at = self.checkpoints.now();
        {
            let mut state = self.state.write().await;
            state.fetch_in_flight = true;
            state.tombstones.clear();
        }

        let fetch = build_snapshot(
            self.source.as_ref(),
            self.config.list_scope(),
            self.config.merge_linked,
        );
        let fetched = match cancel.as_mut() {
            Some(cancel) => tokio::select! {
                result = fetch => result,
                _ = cancelled(cancel) => Err(ReconError::Cancelled),
            },
            None => fetch.await,
        };

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.state.write().await.fetch_in_flight = false;
                match &e {
                    ReconError::Cancelled => tracing::info!("Check cancelled while fetching"),
                    _ => tracing::warn!(error = %e, "Check aborted: snapshot fetch failed"),
                }
                return Err(e);
            }
        };

        // ── Reconciling ──
        self.set_phase(CheckPhase::Reconciling);
        let mut state = self.state.write().await;
        state.fetch_in_flight = false;
        let tombstones = std::mem::take(&mut state.tombstones);
        let snapshot = if tombstones.is_empty() {
            snapshot
        } else {
            tracing::debug!(
                count = tombstones.len(),
                "Applying deletions made during fetch"
            );
            snapshot.without(&tombstones)
        };

        let basis = self.checkpoints.current().await;
        let views = ContactViews::compute(snapshot, basis, &self.config);

        if cancel.as_ref().is_some_and(|c| *c.borrow()) {
            tracing::info!("Check cancelled before completing; nothing applied");
            return Err(ReconError::Cancelled);
        }

        // ── Completing ──
        self.set_phase(CheckPhase::Completing);
        let new_contacts = views.new_contacts_since_last_check().to_vec();
        let persons = views.all_contacts().len();
        let first_ready = !state.ready;
        state.ready = true;
        state.views = Arc::new(views);
        drop(state);

        // Persisted outside the state lock so readers never wait on storage
        let checkpoints = self
            .checkpoints
            .commit_check(!new_contacts.is_empty(), checked_at)
            .await;

        tracing::info!(
            persons,
            new = new_contacts.len(),
            "Contact check complete"
        );

        if first_ready {
            self.emit(ManagerEvent::AddressBookReady { persons });
        }
        self.emit(ManagerEvent::ChangeCompleted {
            run_id,
            new_contacts: new_contacts.iter().map(|p| p.id.clone()).collect(),
        });

        Ok(Arc::new(CheckReport {
            run_id,
            new_contacts,
            checkpoints,
        }))
    }

    // ── Mutations ──

    /// Delete one raw record from the source and from every view.
    ///
    /// All-or-nothing: when the source refuses, views are left unchanged and
    /// [`ReconError::DeleteFailed`] is returned. A person merged from several
    /// linked records is refused with [`ReconError::MergedContact`]; deleting
    /// one of its records would leave the person in place under another id.
    /// Use [`Self::remove_all_linked_contacts`] for those.
    pub async fn delete_contact(&self, id: &ContactId) -> Result<()> {
        let mut state = self.state.write().await;
        match state.views.snapshot().person_for(id) {
            None => return Err(ReconError::ContactNotFound(id.clone())),
            Some(person) if person.is_merged() => {
                return Err(ReconError::MergedContact {
                    id: id.clone(),
                    members: person.member_ids.to_vec(),
                });
            }
            Some(_) => {}
        }

        if let Err(e) = self.source.delete(id).await {
            tracing::warn!(id = %id, error = %e, "Source rejected contact deletion");
            return Err(ReconError::DeleteFailed {
                failed: vec![id.clone()],
                deleted: Vec::new(),
                reason: e.to_string(),
            });
        }

        let removed: HashSet<ContactId> = [id.clone()].into_iter().collect();
        self.remove_from_views(&mut state, &removed);
        drop(state);

        tracing::info!(id = %id, "Contact deleted");
        self.emit(ManagerEvent::ContactsDeleted {
            ids: vec![id.clone()],
        });
        Ok(())
    }

    /// Delete every raw record linked to the person exposing `id`.
    ///
    /// The targets are the merged person's members, or else every record in its
    /// link group, or else just the record itself. Every target is attempted;
    /// on any failure the successful deletions stay applied and
    /// [`ReconError::DeleteFailed`] lists both sides. Returns the deleted ids.
    pub async fn remove_all_linked_contacts(&self, id: &ContactId) -> Result<Vec<ContactId>> {
        let mut state = self.state.write().await;
        let views = Arc::clone(&state.views);
        let person = views
            .snapshot()
            .person_for(id)
            .ok_or_else(|| ReconError::ContactNotFound(id.clone()))?;

        let targets: Vec<ContactId> = if person.is_merged() {
            person.member_ids.to_vec()
        } else if let Some(group) = &person.link_group_id {
            views.snapshot().link_group_members(group)
        } else {
            vec![person.id.clone()]
        };

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        let mut reason = String::new();

        for target in targets {
            match self.source.delete(&target).await {
                Ok(()) => deleted.push(target),
                Err(e) => {
                    tracing::warn!(id = %target, error = %e, "Linked contact deletion failed");
                    reason = e.to_string();
                    failed.push(target);
                }
            }
        }

        if !deleted.is_empty() {
            let removed: HashSet<ContactId> = deleted.iter().cloned().collect();
            self.remove_from_views(&mut state, &removed);
        }
        drop(state);

        if !deleted.is_empty() {
            tracing::info!(count = deleted.len(), "Linked contacts deleted");
            self.emit(ManagerEvent::ContactsDeleted {
                ids: deleted.clone(),
            });
        }

        if failed.is_empty() {
            Ok(deleted)
        } else {
            Err(ReconError::DeleteFailed {
                failed,
                deleted,
                reason,
            })
        }
    }

    fn remove_from_views(&self, state: &mut ManagerState, removed: &HashSet<ContactId>) {
        state.views = Arc::new(state.views.without(removed, &self.config));
        if state.fetch_in_flight {
            state.tombstones.extend(removed.iter().cloned());
        }
    }

    fn set_phase(&self, phase: CheckPhase) {
        self.phase.send_replace(phase);
    }

    fn emit(&self, event: ManagerEvent) {
        tracing::trace!(event = event.name(), "Emitting manager event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Clears the in-flight slot when the leading check ends, however it ends.
struct InflightGuard<'a> {
    manager: &'a ContactsManager,
    released: bool,
}

impl InflightGuard<'_> {
    /// Hand the leader's result to every coalesced waiter.
    fn finish(mut self, result: &Result<Arc<CheckReport>>) {
        self.release(result);
    }

    fn release(&mut self, result: &Result<Arc<CheckReport>>) {
        if self.released {
            return;
        }
        self.released = true;

        // Idle before the slot opens, so the next leader's Fetching wins
        self.manager.set_phase(CheckPhase::Idle);
        let waiters = self
            .manager
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        // Leader dropped mid-cycle: release waiters rather than strand them.
        self.release(&Err(ReconError::Cancelled));
    }
}

/// Resolves once the cancel flag is true. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ManualClock;
    use crate::persistence::MemoryCheckpointPersistence;
    use crate::source::MemoryContactSource;
    use crate::types::{RawContact, Timestamp};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn manager(records: Vec<RawContact>) -> (ContactsManager, Arc<MemoryContactSource>) {
        let source = Arc::new(MemoryContactSource::new(records));
        let manager = ContactsManager::open_with_clock(
            source.clone(),
            Arc::new(MemoryCheckpointPersistence::default()),
            Arc::new(ManualClock::new(ts(1_000))),
            ReconConfig::default(),
        )
        .await
        .unwrap();
        (manager, source)
    }

    #[tokio::test]
    async fn test_views_are_empty_before_first_check() {
        let (manager, _) = manager(vec![RawContact::new("a").created(ts(1))]).await;
        assert!(manager.all_contacts().await.is_empty());
        assert_eq!(manager.phase(), CheckPhase::Idle);
    }

    #[tokio::test]
    async fn test_delete_unknown_contact_is_not_found() {
        let (manager, _) = manager(vec![RawContact::new("a").created(ts(1))]).await;
        manager.check_new_contacts().await.unwrap();

        let err = manager
            .delete_contact(&ContactId::from("zzz"))
            .await
            .unwrap_err();
        assert_eq!(err, ReconError::ContactNotFound(ContactId::from("zzz")));
    }

    #[tokio::test]
    async fn test_failed_fetch_returns_to_idle() {
        let (manager, source) = manager(vec![]).await;
        source.set_unavailable(true);

        assert!(manager.check_new_contacts().await.is_err());
        assert_eq!(manager.phase(), CheckPhase::Idle);

        source.set_unavailable(false);
        assert!(manager.check_new_contacts().await.is_ok());
    }

    #[tokio::test]
    async fn test_views_without_rederives_against_basis() {
        let basis = CheckpointSet::restore(Some(ts(10)), None, None, None);
        let snapshot = Snapshot::from_raw(
            vec![
                RawContact::new("a").created(ts(20)).named("A", ""),
                RawContact::new("b").created(ts(30)).named("B", ""),
            ],
            true,
        );
        let views = ContactViews::compute(snapshot, basis, &ReconConfig::default());
        assert_eq!(views.new_contacts_since_last_check().len(), 2);

        let removed: HashSet<ContactId> = [ContactId::from("a")].into_iter().collect();
        let trimmed = views.without(&removed, &ReconConfig::default());
        assert_eq!(trimmed.basis(), basis);
        assert_eq!(trimmed.new_contacts_since_last_check().len(), 1);
        assert_eq!(trimmed.all_contacts()[0].id, ContactId::from("b"));
    }
}
