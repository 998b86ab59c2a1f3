use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Scalar aliases ───────────────────────────────────────────

/// Wall-clock instant (UTC) used for creation times and checkpoints.
pub type Timestamp = DateTime<Utc>;

// ─── Identifiers ──────────────────────────────────────────────

/// Stable record identifier assigned by the contact source.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        ContactId(s.to_string())
    }
}

impl From<String> for ContactId {
    fn from(s: String) -> Self {
        ContactId(s)
    }
}

/// Source-provided identifier shared by raw records the source considers one person.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkGroupId(pub String);

impl fmt::Display for LinkGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkGroupId {
    fn from(s: &str) -> Self {
        LinkGroupId(s.to_string())
    }
}

// ─── Raw source record ────────────────────────────────────────

/// One record as the contact source reports it, before normalization.
///
/// Only identity, creation time and link-group membership drive
/// reconciliation; the name/phone/email fields feed the fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContact {
    pub id: ContactId,

    /// Creation time reported by the source. Missing on some platforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,

    /// Creation time stamped by this app the first time it saw the record.
    /// Takes precedence over `created_at` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_created: Option<Timestamp>,

    /// Link-group membership; empty string is treated as unlinked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_group_id: Option<LinkGroupId>,

    /// Container the record lives in. `None` means the source's default container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl RawContact {
    pub fn new(id: impl Into<ContactId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn created(mut self, at: Timestamp) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn linked(mut self, group: impl Into<String>) -> Self {
        self.link_group_id = Some(LinkGroupId(group.into()));
        self
    }

    pub fn named(mut self, given: &str, family: &str) -> Self {
        self.given_name = given.to_string();
        self.family_name = family.to_string();
        self
    }

    pub fn phone(mut self, phone: &str) -> Self {
        self.phones.push(phone.to_string());
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.emails.push(email.to_string());
        self
    }

    /// Effective creation time: the app-stamped value wins over the source value.
    pub fn effective_created_at(&self) -> Option<Timestamp> {
        self.original_created.or(self.created_at)
    }

    /// Link group, with empty identifiers treated as absent.
    pub fn link_group(&self) -> Option<&LinkGroupId> {
        self.link_group_id
            .as_ref()
            .filter(|group| !group.0.trim().is_empty())
    }

    /// Whether the record lives in the source's default container.
    pub fn in_default_container(&self) -> bool {
        self.container_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_original_created_wins() {
        let source = Utc.timestamp_opt(2_000, 0).unwrap();
        let stamped = Utc.timestamp_opt(1_000, 0).unwrap();
        let mut raw = RawContact::new("a").created(source);
        assert_eq!(raw.effective_created_at(), Some(source));

        raw.original_created = Some(stamped);
        assert_eq!(raw.effective_created_at(), Some(stamped));
    }

    #[test]
    fn test_empty_link_group_is_unlinked() {
        let raw = RawContact::new("a").linked("  ");
        assert!(raw.link_group().is_none());

        let raw = RawContact::new("b").linked("g1");
        assert_eq!(raw.link_group(), Some(&LinkGroupId::from("g1")));
    }

    #[test]
    fn test_new_record_has_only_an_id() {
        let raw = RawContact::new("7");
        assert_eq!(raw.id, ContactId::from("7"));
        assert_eq!(raw.effective_created_at(), None);
        assert!(raw.link_group().is_none());
        assert!(raw.in_default_container());
        assert_eq!(RawContact::default().id, ContactId::default());
    }

    #[test]
    fn test_raw_contact_deserializes_with_defaults() {
        let raw: RawContact = serde_json::from_str(r#"{"id":"42"}"#).unwrap();
        assert_eq!(raw.id, ContactId::from("42"));
        assert!(raw.created_at.is_none());
        assert!(raw.phones.is_empty());
    }
}
