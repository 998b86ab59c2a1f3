//! Slice engine
//!
//! Derives the `recent` and `new_since_last_check` views of a snapshot from a
//! [`CheckpointSet`]. Pure: no I/O, no clock, no shared state.

use serde::Serialize;
use std::collections::HashMap;

use crate::checkpoint::CheckpointSet;
use crate::duplicates::DuplicateClusters;
use crate::person::Person;
use crate::types::ContactId;

/// Derived views over one snapshot. Both preserve snapshot order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Slices {
    /// Created strictly after `last_opened_old`.
    pub recent: Vec<Person>,
    /// Created strictly after `last_checked`, minus re-appearances of people
    /// already known.
    pub new_since_last_check: Vec<Person>,
}

/// Derive both slices.
///
/// When `duplicates` is given, a time-new person is dropped from
/// `new_since_last_check` if its cluster holds anyone who is not time-new
/// (a new record for someone already known). A cluster made only of new
/// persons is one new individual and contributes its first member.
pub fn derive_slices(
    all: &[Person],
    checkpoints: &CheckpointSet,
    duplicates: Option<&DuplicateClusters>,
) -> Slices {
    let recent: Vec<Person> = all
        .iter()
        .filter(|p| p.created_after(checkpoints.last_opened_old()))
        .cloned()
        .collect();

    let last_checked = checkpoints.last_checked();
    let time_new = all.iter().filter(|p| p.created_after(last_checked));

    let new_since_last_check: Vec<Person> = match duplicates {
        None => time_new.cloned().collect(),
        Some(clusters) => {
            let verdicts = cluster_verdicts(clusters, checkpoints);
            time_new
                .filter(|p| match verdicts.get(&p.id) {
                    None => true,
                    Some(Verdict::KnownPerson) => false,
                    Some(Verdict::NewPerson { representative }) => *representative == p.id,
                })
                .cloned()
                .collect()
        }
    };

    tracing::debug!(
        all = all.len(),
        recent = recent.len(),
        new = new_since_last_check.len(),
        "Slices derived"
    );

    Slices {
        recent,
        new_since_last_check,
    }
}

enum Verdict {
    /// The cluster contains someone created at or before `last_checked`.
    KnownPerson,
    /// Every member is new; only the first member is reported.
    NewPerson { representative: ContactId },
}

fn cluster_verdicts(
    clusters: &DuplicateClusters,
    checkpoints: &CheckpointSet,
) -> HashMap<ContactId, Verdict> {
    let last_checked = checkpoints.last_checked();
    let mut verdicts = HashMap::new();

    for cluster in clusters {
        let known = cluster
            .members()
            .iter()
            .any(|p| !p.created_after(last_checked));

        for member in cluster.members() {
            let verdict = if known {
                Verdict::KnownPerson
            } else {
                Verdict::NewPerson {
                    representative: cluster.members()[0].id.clone(),
                }
            };
            verdicts.insert(member.id.clone(), verdict);
        }
    }

    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::find_duplicates;
    use crate::types::{RawContact, Timestamp};
    use chrono::{TimeZone, Utc};

    const T0: i64 = 1_000;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ids(persons: &[Person]) -> Vec<&str> {
        persons.iter().map(|p| p.id.as_str()).collect()
    }

    fn at(id: &str, secs: i64) -> Person {
        Person::from_raw(&RawContact::new(id).created(ts(secs)).named(id, ""))
    }

    #[test]
    fn test_scenario_boundaries_are_strict() {
        let all = vec![at("old", T0 - 1), at("edge", T0), at("p1", T0 + 1), at("p2", T0 + 2)];
        let checkpoints = CheckpointSet::restore(Some(ts(T0)), None, Some(ts(T0)), Some(ts(T0)));

        let slices = derive_slices(&all, &checkpoints, None);
        assert_eq!(ids(&slices.recent), vec!["p1", "p2"]);
        assert_eq!(ids(&slices.new_since_last_check), vec!["p1", "p2"]);
    }

    #[test]
    fn test_unknown_creation_is_never_recent_or_new() {
        let all = vec![Person::from_raw(&RawContact::new("x").named("X", "")), at("y", 5)];
        let slices = derive_slices(&all, &CheckpointSet::default(), None);
        assert_eq!(ids(&slices.recent), vec!["y"]);
        assert_eq!(ids(&slices.new_since_last_check), vec!["y"]);
    }

    #[test]
    fn test_recent_and_new_use_different_boundaries() {
        let all = vec![at("a", 10), at("b", 20), at("c", 30)];
        let checkpoints = CheckpointSet::restore(Some(ts(25)), None, Some(ts(15)), Some(ts(15)));

        let slices = derive_slices(&all, &checkpoints, None);
        assert_eq!(ids(&slices.recent), vec!["b", "c"]);
        assert_eq!(ids(&slices.new_since_last_check), vec!["c"]);
    }

    #[test]
    fn test_new_record_of_known_person_is_excluded() {
        let known = Person::from_raw(
            &RawContact::new("known").created(ts(T0 - 50)).named("Anne", "Smith"),
        );
        let again = Person::from_raw(
            &RawContact::new("again").created(ts(T0 + 5)).named("anne", "SMITH"),
        );
        let fresh = at("fresh", T0 + 6);
        let all = vec![known, again, fresh];
        let checkpoints = CheckpointSet::restore(Some(ts(T0)), None, None, None);

        let clusters = find_duplicates(&all);
        let slices = derive_slices(&all, &checkpoints, Some(&clusters));
        assert_eq!(ids(&slices.new_since_last_check), vec!["fresh"]);
        // Recency is not filtered by duplicates
        assert_eq!(ids(&slices.recent), vec!["known", "again", "fresh"]);
    }

    #[test]
    fn test_merged_person_with_unknown_creation_is_never_sliced() {
        let a = RawContact::new("u1").linked("g").named("Una", "");
        let b = RawContact::new("u2").linked("g");
        let merged = Person::merge(&[&a, &b]).unwrap();
        assert_eq!(merged.created_at, None);

        let all = vec![merged, at("k", 5)];
        let clusters = find_duplicates(&all);
        let slices = derive_slices(&all, &CheckpointSet::default(), Some(&clusters));
        assert_eq!(ids(&slices.recent), vec!["k"]);
        assert_eq!(ids(&slices.new_since_last_check), vec!["k"]);
    }

    #[test]
    fn test_batch_duplicates_report_one_individual() {
        let first = Person::from_raw(&RawContact::new("n1").created(ts(T0 + 1)).email("z@z.io"));
        let second = Person::from_raw(&RawContact::new("n2").created(ts(T0 + 2)).email("Z@z.io"));
        let all = vec![first, second];
        let checkpoints = CheckpointSet::restore(Some(ts(T0)), None, None, None);

        let clusters = find_duplicates(&all);
        let slices = derive_slices(&all, &checkpoints, Some(&clusters));
        assert_eq!(ids(&slices.new_since_last_check), vec!["n1"]);
    }
}
