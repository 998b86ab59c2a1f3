//! contact-recon - Contact Reconciliation Core
//!
//! Tracks a device's contact list over time and answers three questions:
//! which contacts are new since the user last checked, which are recent
//! relative to the last app session, and which contacts duplicate each other.
//!
//! ## Pipeline
//! Contact source -> Snapshot (link merge) -> Duplicate clusters -> Slices ->
//! Checkpoint commit -> host notification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use contact_recon::{
//!     ContactsManager, MemoryCheckpointPersistence, MemoryContactSource, ReconConfig,
//! };
//!
//! # async fn run() -> contact_recon::Result<()> {
//! let source = Arc::new(MemoryContactSource::new(Vec::new()));
//! let manager = ContactsManager::open(
//!     source,
//!     Arc::new(MemoryCheckpointPersistence::default()),
//!     ReconConfig::default(),
//! )
//! .await?;
//!
//! let report = manager.check_new_contacts().await?;
//! println!("{} new contact(s)", report.new_contacts.len());
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Identifiers and raw records
pub mod types;

// Person model adapter
pub mod normalize;
pub mod person;

// Reconciliation core (pure)
pub mod duplicates;
pub mod slices;
pub mod snapshot;

// Checkpoints and their persistence
pub mod checkpoint;
pub mod persistence;

// Collaborators, configuration and the async manager
pub mod config;
pub mod events;
pub mod manager;
pub mod source;

pub use checkpoint::{CheckpointSet, CheckpointStore, Clock, ManualClock, SystemClock};
pub use config::{InflightPolicy, ReconConfig};
pub use duplicates::{find_duplicates, DuplicateCluster, DuplicateClusters};
pub use error::{ReconError, Result};
pub use events::ManagerEvent;
pub use manager::{CheckPhase, CheckReport, ContactViews, ContactsManager};
pub use persistence::{
    CheckpointPersistence, JsonFileCheckpointPersistence, MemoryCheckpointPersistence,
};
pub use person::{Fingerprint, Person};
pub use slices::{derive_slices, Slices};
pub use snapshot::{build_snapshot, Snapshot};
pub use source::{ContactSource, JsonFileContactSource, ListScope, MemoryContactSource};
pub use types::{ContactId, LinkGroupId, RawContact, Timestamp};
