//! Snapshot builder
//!
//! Pulls the full contact set from the source and, optionally, collapses
//! linked records into single logical persons. A [`Snapshot`] is an
//! immutable value: merges are recomputed per build, never patched in place.

use std::collections::{HashMap, HashSet};

use crate::error::{ReconError, Result};
use crate::person::Person;
use crate::source::{ContactSource, ListScope};
use crate::types::{ContactId, LinkGroupId, RawContact};

/// Immutable result of one snapshot build.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Raw records as listed, minus rejected duplicates.
    raw: Vec<RawContact>,
    /// Exposed persons, in source order.
    persons: Vec<Person>,
    merge_linked: bool,
}

impl Snapshot {
    /// Build from already-fetched records.
    pub fn from_raw(raw: Vec<RawContact>, merge_linked: bool) -> Self {
        let raw = drop_duplicate_ids(raw);
        let persons = merge_records(&raw, merge_linked);
        Self {
            raw,
            persons,
            merge_linked,
        }
    }

    pub fn persons(&self) -> &[Person] {
        &self.persons
    }

    pub fn raw(&self) -> &[RawContact] {
        &self.raw
    }

    pub fn merge_linked(&self) -> bool {
        self.merge_linked
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    /// Find the person exposing raw record `id` (directly or as a merged member).
    pub fn person_for(&self, id: &ContactId) -> Option<&Person> {
        self.persons.iter().find(|p| p.contains(id))
    }

    /// Raw ids sharing `group`, in source order.
    pub fn link_group_members(&self, group: &LinkGroupId) -> Vec<ContactId> {
        self.raw
            .iter()
            .filter(|r| r.link_group() == Some(group))
            .map(|r| r.id.clone())
            .collect()
    }

    /// A new snapshot with the given raw records removed and merges recomputed.
    pub fn without(&self, removed: &HashSet<ContactId>) -> Self {
        let raw: Vec<RawContact> = self
            .raw
            .iter()
            .filter(|r| !removed.contains(&r.id))
            .cloned()
            .collect();
        let persons = merge_records(&raw, self.merge_linked);
        Self {
            raw,
            persons,
            merge_linked: self.merge_linked,
        }
    }
}

/// Fetch every contact from `source` and build a snapshot.
///
/// Fails with [`ReconError::SourceUnavailable`] when the source cannot be read.
pub async fn build_snapshot(
    source: &dyn ContactSource,
    scope: ListScope,
    merge_linked: bool,
) -> Result<Snapshot> {
    let raw = source.list_all_contacts(scope).await.map_err(|e| {
        tracing::warn!(error = %e, "Contact source listing failed");
        ReconError::source_unavailable(&e)
    })?;

    let raw_count = raw.len();
    let snapshot = Snapshot::from_raw(raw, merge_linked);

    tracing::debug!(
        raw = raw_count,
        persons = snapshot.persons.len(),
        merge_linked,
        "Snapshot built"
    );

    Ok(snapshot)
}

/// Adapt raw records into persons, collapsing link groups when `merge_linked`.
///
/// Each merged person appears at the position of its group's first record.
/// Groups of one record stay as a plain person.
pub fn merge_records(raw: &[RawContact], merge_linked: bool) -> Vec<Person> {
    if !merge_linked {
        return raw.iter().map(Person::from_raw).collect();
    }

    let mut groups: HashMap<&LinkGroupId, Vec<&RawContact>> = HashMap::new();
    for record in raw {
        if let Some(group) = record.link_group() {
            groups.entry(group).or_default().push(record);
        }
    }

    let mut emitted: HashSet<&LinkGroupId> = HashSet::new();
    let mut persons = Vec::with_capacity(raw.len());

    for record in raw {
        match record.link_group() {
            None => persons.push(Person::from_raw(record)),
            Some(group) => {
                if !emitted.insert(group) {
                    continue;
                }
                let members = groups.get(group).map(Vec::as_slice).unwrap_or_default();
                if let Some(person) = Person::merge(members) {
                    persons.push(person);
                }
            }
        }
    }

    persons
}

/// Keep the first record for each id; later repeats are a data-quality issue.
fn drop_duplicate_ids(raw: Vec<RawContact>) -> Vec<RawContact> {
    let mut seen: HashSet<ContactId> = HashSet::with_capacity(raw.len());
    raw.into_iter()
        .filter(|record| {
            if seen.insert(record.id.clone()) {
                true
            } else {
                tracing::warn!(id = %record.id, "Skipping repeated contact id in listing");
                false
            }
        })
        .collect()
}
