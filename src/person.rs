//! Person model adapter
//!
//! Turns raw source records into the reconciliation-facing [`Person`] value:
//! identity, effective creation time, link-group membership and a
//! normalized [`Fingerprint`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;

use crate::normalize::{normalize_display_name, normalize_email, normalize_phone};
use crate::types::{ContactId, LinkGroupId, RawContact, Timestamp};

/// Separator used when flattening a fingerprint into an index key.
const KEY_SEPARATOR: char = '\u{1f}';

/// Normalized identity signature used for similarity-based duplicate matching.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Normalized display name (personal name, or organization when absent).
    pub name: String,
    /// Digit-only phone numbers.
    pub phones: BTreeSet<String>,
    /// Lowercased email addresses.
    pub emails: BTreeSet<String>,
}

impl Fingerprint {
    pub fn from_raw(raw: &RawContact) -> Self {
        Self {
            name: normalize_display_name(&raw.given_name, &raw.family_name, &raw.organization),
            phones: raw.phones.iter().filter_map(|p| normalize_phone(p)).collect(),
            emails: raw.emails.iter().filter_map(|e| normalize_email(e)).collect(),
        }
    }

    /// A fingerprint with no identifying field never matches anything.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.phones.is_empty() && self.emails.is_empty()
    }

    /// Fold another fingerprint into this one.
    ///
    /// Phone and email sets are unioned; the first non-empty name is kept.
    pub fn absorb(&mut self, other: &Fingerprint) {
        if self.name.is_empty() {
            self.name = other.name.clone();
        }
        self.phones.extend(other.phones.iter().cloned());
        self.emails.extend(other.emails.iter().cloned());
    }

    /// Index key for exact fingerprint matching. `None` for empty fingerprints.
    pub fn match_key(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let phones: Vec<&str> = self.phones.iter().map(String::as_str).collect();
        let emails: Vec<&str> = self.emails.iter().map(String::as_str).collect();
        Some(format!(
            "{}{sep}{}{sep}{}",
            self.name,
            phones.join(","),
            emails.join(","),
            sep = KEY_SEPARATOR
        ))
    }
}

/// One logical contact after optional link-merging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Identifier of the first raw record of the person, in source order.
    pub id: ContactId,

    /// Every raw record collapsed into this person (just `id` when unmerged).
    pub member_ids: SmallVec<[ContactId; 2]>,

    /// Effective creation time; `None` means unknown, never epoch zero.
    pub created_at: Option<Timestamp>,

    pub link_group_id: Option<LinkGroupId>,

    pub fingerprint: Fingerprint,
}

impl Person {
    /// Adapt a single raw record.
    pub fn from_raw(raw: &RawContact) -> Self {
        let mut member_ids = SmallVec::new();
        member_ids.push(raw.id.clone());
        Self {
            id: raw.id.clone(),
            member_ids,
            created_at: raw.effective_created_at(),
            link_group_id: raw.link_group().cloned(),
            fingerprint: Fingerprint::from_raw(raw),
        }
    }

    /// Collapse a link group into one person.
    ///
    /// The earliest known creation time wins; members with unknown creation
    /// time do not contribute. Returns `None` for an empty group.
    pub fn merge(group: &[&RawContact]) -> Option<Self> {
        let (first, rest) = group.split_first()?;
        let mut person = Person::from_raw(first);

        for raw in rest {
            person.member_ids.push(raw.id.clone());
            person.created_at = match (person.created_at, raw.effective_created_at()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            person.fingerprint.absorb(&Fingerprint::from_raw(raw));
        }

        Some(person)
    }

    pub fn is_merged(&self) -> bool {
        self.member_ids.len() > 1
    }

    pub fn contains(&self, id: &ContactId) -> bool {
        self.member_ids.iter().any(|m| m == id)
    }

    /// Strictly created after `boundary`. Unknown creation is never after anything;
    /// an unset boundary is the beginning of time.
    pub fn created_after(&self, boundary: Option<Timestamp>) -> bool {
        match (self.created_at, boundary) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(created), Some(boundary)) => created > boundary,
        }
    }
}
