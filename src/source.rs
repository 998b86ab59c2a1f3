//! Contact source collaborator
//!
//! The address book itself lives outside this crate. The core needs three
//! things from it: a full listing, deletion by id, and a change stream.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

use crate::error::SourceError;
use crate::types::{ContactId, RawContact};

/// Capacity of the change broadcast; slow listeners see `Lagged` and just re-check.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Which containers a listing covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListScope {
    #[default]
    AllContainers,
    DefaultContainer,
}

/// Signal that the source's contents changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceChanged {
    /// Monotonic per-source change counter.
    pub sequence: u64,
}

/// External contact source.
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// List every raw record in scope, in source order.
    async fn list_all_contacts(&self, scope: ListScope) -> Result<Vec<RawContact>, SourceError>;

    /// Remove one raw record.
    async fn delete(&self, id: &ContactId) -> Result<(), SourceError>;

    /// Subscribe to change notifications.
    fn subscribe_changes(&self) -> broadcast::Receiver<SourceChanged>;
}

fn in_scope(record: &RawContact, scope: ListScope) -> bool {
    match scope {
        ListScope::AllContainers => true,
        ListScope::DefaultContainer => record.in_default_container(),
    }
}

// ── MemoryContactSource ──

/// In-memory source for tests and embedding hosts, with failure injection.
///
/// Changes made through [`ContactSource::delete`] are not announced on the
/// change stream; the caller already knows about them.
pub struct MemoryContactSource {
    records: RwLock<Vec<RawContact>>,
    changes: broadcast::Sender<SourceChanged>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
    rejected_deletes: std::sync::Mutex<HashSet<ContactId>>,
    list_delay: std::sync::Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
}

impl MemoryContactSource {
    pub fn new(records: Vec<RawContact>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(records),
            changes,
            sequence: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            rejected_deletes: std::sync::Mutex::new(HashSet::new()),
            list_delay: std::sync::Mutex::new(None),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Add a record and announce the change.
    pub async fn insert(&self, record: RawContact) {
        self.records.write().await.push(record);
        self.notify_changed();
    }

    pub async fn records(&self) -> Vec<RawContact> {
        self.records.read().await.clone()
    }

    /// Make listings fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Refuse deletion of `id` (as a permission failure would).
    pub fn reject_delete(&self, id: impl Into<ContactId>) {
        self.rejected_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into());
    }

    /// Delay every listing after its contents are read, to simulate a slow address book.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Number of listings served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn notify_changed(&self) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is fine
        let _ = self.changes.send(SourceChanged { sequence });
    }
}

#[async_trait]
impl ContactSource for MemoryContactSource {
    async fn list_all_contacts(&self, scope: ListScope) -> Result<Vec<RawContact>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::AccessDenied);
        }

        let listed: Vec<RawContact> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| in_scope(r, scope))
            .cloned()
            .collect();

        // Contents are captured before the delay, like a slow transfer
        let delay = *self.list_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(listed)
    }

    async fn delete(&self, id: &ContactId) -> Result<(), SourceError> {
        let rejected = self
            .rejected_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id);
        if rejected {
            return Err(SourceError::Rejected(format!(
                "permission denied for contact '{}'",
                id
            )));
        }

        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| &r.id != id);
        if records.len() == before {
            return Err(SourceError::NotFound(id.clone()));
        }
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SourceChanged> {
        self.changes.subscribe()
    }
}

// ── JsonFileContactSource ──

/// Contacts exported to a JSON array of [`RawContact`] on disk.
///
/// Used by the CLI host. Deletions rewrite the file via temp file + rename.
pub struct JsonFileContactSource {
    path: PathBuf,
    changes: broadcast::Sender<SourceChanged>,
    sequence: AtomicU64,
}

impl JsonFileContactSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            changes,
            sequence: AtomicU64::new(0),
        }
    }

    async fn read_all(&self) -> Result<Vec<RawContact>, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_all(&self, records: &[RawContact]) -> Result<(), SourceError> {
        let body = serde_json::to_vec_pretty(records)?;
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContactSource for JsonFileContactSource {
    async fn list_all_contacts(&self, scope: ListScope) -> Result<Vec<RawContact>, SourceError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|r| in_scope(r, scope))
            .collect())
    }

    async fn delete(&self, id: &ContactId) -> Result<(), SourceError> {
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| &r.id != id);
        if records.len() == before {
            return Err(SourceError::NotFound(id.clone()));
        }
        self.write_all(&records).await?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.changes.send(SourceChanged { sequence });
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SourceChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_delete_rejection_and_missing() {
        let source = MemoryContactSource::new(vec![RawContact::new("a"), RawContact::new("b")]);
        source.reject_delete("b");

        source.delete(&ContactId::from("a")).await.unwrap();
        assert!(matches!(
            source.delete(&ContactId::from("a")).await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            source.delete(&ContactId::from("b")).await,
            Err(SourceError::Rejected(_))
        ));
        assert_eq!(source.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_insert_announces_change() {
        let source = MemoryContactSource::new(vec![]);
        let mut rx = source.subscribe_changes();

        source.insert(RawContact::new("a")).await;
        assert_eq!(rx.recv().await.unwrap(), SourceChanged { sequence: 1 });
    }

    #[tokio::test]
    async fn test_json_file_source_lists_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.json");
        let mut other = RawContact::new("b");
        other.container_id = Some("work".to_string());
        std::fs::write(
            &path,
            serde_json::to_vec(&vec![RawContact::new("a"), other]).unwrap(),
        )
        .unwrap();

        let source = JsonFileContactSource::new(&path);
        assert_eq!(
            source.list_all_contacts(ListScope::AllContainers).await.unwrap().len(),
            2
        );
        assert_eq!(
            source
                .list_all_contacts(ListScope::DefaultContainer)
                .await
                .unwrap()
                .len(),
            1
        );

        let mut rx = source.subscribe_changes();
        source.delete(&ContactId::from("a")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().sequence, 1);

        let left = source.list_all_contacts(ListScope::AllContainers).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, ContactId::from("b"));
    }
}
