//! Property tests for the pure reconciliation pipeline
//!
//! Tests verify:
//! 1. Duplicate clusters partition their members and are never singletons
//! 2. Cluster membership is stable under input reordering
//! 3. `recent` is exactly the known-creation persons after `last_opened_old`
//! 4. `new_since_last_check` stays inside `recent` when `last_checked >= last_opened_old`

use std::collections::{BTreeSet, HashSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use contact_recon::{
    derive_slices, find_duplicates, CheckpointSet, DuplicateClusters, Person, RawContact,
    Snapshot, Timestamp,
};

const NAMES: &[&str] = &["Anne Smith", "anne  SMITH", "Bob Jones", ""];
const PHONES: &[&str] = &["+1 555 0100", "15550100", "555-0199"];

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn raw_contacts() -> impl Strategy<Value = Vec<RawContact>> {
    prop::collection::vec(
        (
            0usize..NAMES.len(),
            prop::option::of(0i64..100),
            prop::option::of(0usize..3),
            prop::option::of(0usize..PHONES.len()),
        ),
        0..24,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (name, created, group, phone))| {
                let mut raw = RawContact::new(format!("c{}", i));
                raw.given_name = NAMES[name].to_string();
                if let Some(secs) = created {
                    raw = raw.created(ts(secs));
                }
                if let Some(group) = group {
                    raw = raw.linked(format!("g{}", group));
                }
                if let Some(phone) = phone {
                    raw = raw.phone(PHONES[phone]);
                }
                raw
            })
            .collect()
    })
}

fn checkpoint_sets() -> impl Strategy<Value = CheckpointSet> {
    (
        prop::option::of(0i64..100),
        prop::option::of(0i64..100),
    )
        .prop_map(|(checked, old)| {
            CheckpointSet::restore(checked.map(ts), None, old.map(ts), old.map(ts))
        })
}

fn membership(clusters: &DuplicateClusters) -> BTreeSet<BTreeSet<String>> {
    clusters
        .iter()
        .map(|c| c.ids().map(|id| id.to_string()).collect())
        .collect()
}

proptest! {
    #[test]
    fn prop_clusters_partition_and_skip_singletons(raw in raw_contacts(), merge in any::<bool>()) {
        let snapshot = Snapshot::from_raw(raw, merge);
        let clusters = find_duplicates(snapshot.persons());

        let mut seen = HashSet::new();
        for cluster in &clusters {
            prop_assert!(cluster.len() >= 2);
            for id in cluster.ids() {
                prop_assert!(seen.insert(id.clone()), "person {} in two clusters", id);
            }
        }
    }

    #[test]
    fn prop_cluster_membership_ignores_input_order(
        (persons, shuffled) in raw_contacts()
            .prop_map(|raw| raw.iter().map(Person::from_raw).collect::<Vec<_>>())
            .prop_flat_map(|persons| (Just(persons.clone()), Just(persons).prop_shuffle()))
    ) {
        let original = find_duplicates(&persons);
        let permuted = find_duplicates(&shuffled);
        prop_assert_eq!(membership(&original), membership(&permuted));

        // Members follow the permuted order
        for cluster in &permuted {
            let positions: Vec<usize> = cluster
                .ids()
                .map(|id| shuffled.iter().position(|p| &p.id == id).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn prop_recent_is_exactly_known_after_boundary(
        raw in raw_contacts(),
        checkpoints in checkpoint_sets(),
        merge in any::<bool>(),
    ) {
        let snapshot = Snapshot::from_raw(raw, merge);
        let clusters = find_duplicates(snapshot.persons());
        let slices = derive_slices(snapshot.persons(), &checkpoints, Some(&clusters));

        let expected: Vec<&Person> = snapshot
            .persons()
            .iter()
            .filter(|p| match (p.created_at, checkpoints.last_opened_old()) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(created), Some(boundary)) => created > boundary,
            })
            .collect();
        prop_assert_eq!(slices.recent.iter().collect::<Vec<_>>(), expected);
        prop_assert!(slices.recent.iter().all(|p| p.created_at.is_some()));
    }

    #[test]
    fn prop_new_is_subset_of_recent_when_checked_later(
        raw in raw_contacts(),
        old in 0i64..100,
        gap in 0i64..50,
    ) {
        let checkpoints = CheckpointSet::restore(Some(ts(old + gap)), None, Some(ts(old)), Some(ts(old)));
        let snapshot = Snapshot::from_raw(raw, true);
        let clusters = find_duplicates(snapshot.persons());
        let slices = derive_slices(snapshot.persons(), &checkpoints, Some(&clusters));

        let recent: HashSet<_> = slices.recent.iter().map(|p| p.id.clone()).collect();
        prop_assert!(slices.new_since_last_check.iter().all(|p| recent.contains(&p.id)));
    }
}
