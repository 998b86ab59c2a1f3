//! Duplicate detection
//!
//! Two signals decide that persons are the same real-world individual:
//!
//! 1. Shared link group (authoritative, reported by the source).
//! 2. Equal fingerprints under the normalization rule.
//!
//! Both signals feed one disjoint-set pass, so clusters found through either
//! path that share a member end up merged. Results are accumulated into an
//! ordered set keyed by the sorted member ids, so the same cluster is never
//! reported twice.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::person::Person;
use crate::types::{ContactId, LinkGroupId};

/// Canonical identity of a cluster: its member ids, sorted.
pub type ClusterKey = Vec<ContactId>;

/// Persons judged to be the same individual, in snapshot order. Never a singleton.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DuplicateCluster {
    members: Vec<Person>,
}

impl DuplicateCluster {
    pub fn members(&self) -> &[Person] {
        &self.members
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContactId> {
        self.members.iter().map(|p| &p.id)
    }

    pub fn contains(&self, id: &ContactId) -> bool {
        self.members.iter().any(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn key(&self) -> ClusterKey {
        let mut key: Vec<ContactId> = self.members.iter().map(|p| p.id.clone()).collect();
        key.sort();
        key
    }
}

/// Insertion-ordered set of clusters, deduplicated by [`ClusterKey`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DuplicateClusters {
    clusters: Vec<DuplicateCluster>,
    #[serde(skip)]
    keys: HashSet<ClusterKey>,
}

impl DuplicateClusters {
    /// Insert a cluster. Singletons and already-present clusters are ignored.
    pub fn insert(&mut self, members: Vec<Person>) -> bool {
        if members.len() < 2 {
            return false;
        }
        let cluster = DuplicateCluster { members };
        if !self.keys.insert(cluster.key()) {
            return false;
        }
        self.clusters.push(cluster);
        true
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DuplicateCluster> {
        self.clusters.iter()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// The cluster containing person `id`, if any.
    pub fn cluster_of(&self, id: &ContactId) -> Option<&DuplicateCluster> {
        self.clusters.iter().find(|c| c.contains(id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ClusterKey> {
        self.keys.iter()
    }
}

impl<'a> IntoIterator for &'a DuplicateClusters {
    type Item = &'a DuplicateCluster;
    type IntoIter = std::slice::Iter<'a, DuplicateCluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Find duplicate clusters over `all`.
///
/// Clusters are emitted in order of their first member in `all`; members keep
/// `all`'s order. Persons with an empty fingerprint only cluster through their
/// link group.
pub fn find_duplicates(all: &[Person]) -> DuplicateClusters {
    let mut sets = DisjointSet::new(all.len());

    // Pass 1: link groups
    let mut by_group: HashMap<&LinkGroupId, usize> = HashMap::new();
    for (idx, person) in all.iter().enumerate() {
        if let Some(group) = &person.link_group_id {
            match by_group.get(group) {
                Some(&first) => sets.union(first, idx),
                None => {
                    by_group.insert(group, idx);
                }
            }
        }
    }

    // Pass 2: fingerprint index
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (idx, person) in all.iter().enumerate() {
        let Some(key) = person.fingerprint.match_key() else {
            continue;
        };
        match by_key.get(&key) {
            Some(&first) => sets.union(first, idx),
            None => {
                by_key.insert(key, idx);
            }
        }
    }

    // Collect components in first-seen order
    let mut order: Vec<usize> = Vec::new();
    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for idx in 0..all.len() {
        let root = sets.find(idx);
        let members = components.entry(root).or_insert_with(|| {
            order.push(root);
            Vec::new()
        });
        members.push(idx);
    }

    let mut clusters = DuplicateClusters::default();
    for root in order {
        if let Some(indices) = components.remove(&root) {
            clusters.insert(indices.into_iter().map(|i| all[i].clone()).collect());
        }
    }

    tracing::debug!(
        persons = all.len(),
        clusters = clusters.len(),
        "Duplicate detection complete"
    );

    clusters
}

/// Union-find over snapshot positions.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] = self.rank[ra].saturating_add(1);
            }
        }
    }
}
