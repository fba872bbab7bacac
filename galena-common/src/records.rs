//! Canonical artifact record model.
//!
//! Every component downstream of the format adapters — correlation,
//! classification, the artifact store, the report writers — speaks only
//! in these types. Nothing outside the adapters ever touches raw
//! container bytes.

use crate::diag::Diagnostic;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Device platform a record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Ios,
    Android,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Unknown => "unknown",
        }
    }
}

/// Artifact families the pipeline extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Contacts,
    Messages,
    Calls,
    Apps,
    Permissions,
    WebHistory,
    Photos,
    Accounts,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 8] = [
        ArtifactKind::Contacts,
        ArtifactKind::Messages,
        ArtifactKind::Calls,
        ArtifactKind::Apps,
        ArtifactKind::Permissions,
        ArtifactKind::WebHistory,
        ArtifactKind::Photos,
        ArtifactKind::Accounts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Contacts => "contacts",
            ArtifactKind::Messages => "messages",
            ArtifactKind::Calls => "calls",
            ArtifactKind::Apps => "apps",
            ArtifactKind::Permissions => "permissions",
            ArtifactKind::WebHistory => "web_history",
            ArtifactKind::Photos => "photos",
            ArtifactKind::Accounts => "accounts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contacts" => Some(ArtifactKind::Contacts),
            "messages" | "sms" => Some(ArtifactKind::Messages),
            "calls" | "call_history" => Some(ArtifactKind::Calls),
            "apps" => Some(ArtifactKind::Apps),
            "permissions" => Some(ArtifactKind::Permissions),
            "web_history" | "browsing" => Some(ArtifactKind::WebHistory),
            "photos" => Some(ArtifactKind::Photos),
            "accounts" => Some(ArtifactKind::Accounts),
            _ => None,
        }
    }
}

/// Where a record came from: the originating file/table inside the
/// container plus what is known about the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Container-relative path of the originating source
    pub source_path: String,
    /// Table within the source, when the source is a database
    pub source_table: Option<String>,
    pub platform: Platform,
    pub os_version: Option<String>,
}

/// Stable record identifier: SHA-256 over source path and row key.
///
/// Hash-based IDs make re-runs over the same container idempotent and
/// give concurrent adapter tasks collision-free appends.
pub fn record_id(source_path: &str, row_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"|");
    hasher.update(row_key.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Stable entity identifier: SHA-256 over an ordered member set.
pub fn entity_id<'a>(members: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for member in members {
        hasher.update(member.as_bytes());
        hasher.update(b"\n");
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Base shape shared by every extracted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub record_id: String,
    pub kind: ArtifactKind,
    pub provenance: Provenance,
    /// Non-fatal issues encountered while building this record
    pub diagnostics: Vec<Diagnostic>,
    pub body: RecordBody,
}

impl CanonicalRecord {
    /// Primary timestamp for ordering/filtering, when the family has one.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        match &self.body {
            RecordBody::Contact(c) => c.created_at.as_ref(),
            RecordBody::Message(m) => m.sent_at.as_ref(),
            RecordBody::Call(c) => c.occurred_at.as_ref(),
            RecordBody::App(a) => a.installed_at.as_ref(),
            RecordBody::Permission(_) => None,
            RecordBody::WebVisit(v) => v.visited_at.as_ref(),
            RecordBody::Photo(p) => p.captured_at.as_ref(),
            RecordBody::Account(a) => a.created_at.as_ref(),
        }
    }

    /// Free-text fields for substring filtering in listings.
    pub fn text_fields(&self) -> Vec<&str> {
        fn push_opt<'a>(s: &'a Option<String>, fields: &mut Vec<&'a str>) {
            if let Some(s) = s {
                fields.push(s.as_str());
            }
        }

        let mut fields: Vec<&str> = Vec::new();
        match &self.body {
            RecordBody::Contact(c) => {
                push_opt(&c.display_name, &mut fields);
                push_opt(&c.first_name, &mut fields);
                push_opt(&c.last_name, &mut fields);
                fields.extend(c.phones.iter().map(|p| p.number.as_str()));
                fields.extend(c.emails.iter().map(|e| e.as_str()));
            }
            RecordBody::Message(m) => {
                push_opt(&m.sender, &mut fields);
                push_opt(&m.body, &mut fields);
                fields.extend(m.participants.iter().map(|p| p.as_str()));
            }
            RecordBody::Call(c) => push_opt(&c.party, &mut fields),
            RecordBody::App(a) => {
                fields.push(a.bundle_id.as_str());
                push_opt(&a.name, &mut fields);
            }
            RecordBody::Permission(p) => {
                fields.push(p.service.as_str());
                fields.push(p.client.as_str());
            }
            RecordBody::WebVisit(v) => {
                fields.push(v.url.as_str());
                push_opt(&v.title, &mut fields);
            }
            RecordBody::Photo(p) => {
                push_opt(&p.file_name, &mut fields);
                fields.extend(p.scene_labels.iter().map(|l| l.label.as_str()));
            }
            RecordBody::Account(a) => {
                fields.push(a.username.as_str());
                push_opt(&a.description, &mut fields);
            }
        }
        fields
    }
}

/// Kind-specific payload. One explicit variant per artifact family; no
/// reflective field access anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordBody {
    Contact(ContactRecord),
    Message(MessageRecord),
    Call(CallRecord),
    App(AppRecord),
    Permission(PermissionRecord),
    WebVisit(WebVisitRecord),
    Photo(PhotoRecord),
    Account(AccountRecord),
}

/// Direction of a message or call relative to the device owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneEntry {
    /// Address-book label ("Mobile", "Home", "Work", ...)
    pub label: String,
    pub number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactRecord {
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phones: Vec<PhoneEntry>,
    pub emails: Vec<String>,
    pub created_at: Option<Timestamp>,
}

impl ContactRecord {
    /// All raw handles this contact row binds together.
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.phones.iter().map(|p| p.number.clone()).collect();
        handles.extend(self.emails.iter().cloned());
        handles
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sent_at: Option<Timestamp>,
    /// Source-side conversation key (chat row id); used for grouping
    pub conversation_key: Option<String>,
    /// Handle of the remote sender; None for outgoing messages
    pub sender: Option<String>,
    /// Remote participant handles (one for 1:1, several for group chats)
    pub participants: Vec<String>,
    pub direction: Direction,
    pub body: Option<String>,
    /// Carrier service ("SMS", "iMessage", ...)
    pub service: Option<String>,
    pub is_group: bool,
    pub group_name: Option<String>,
    pub attachments: Vec<Attachment>,
    pub delivered: Option<bool>,
    pub read: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    Voice,
    FaceTimeVideo,
    FaceTimeAudio,
    Other(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub occurred_at: Option<Timestamp>,
    pub duration_secs: Option<i64>,
    /// Handle of the other party
    pub party: Option<String>,
    pub direction: Direction,
    pub answered: Option<bool>,
    pub call_type: CallType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub bundle_id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub installed_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Denied,
    Unknown,
    Granted,
    Limited,
    Other(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Protected service ("kTCCServiceCamera", "android.permission.CAMERA")
    pub service: String,
    /// Requesting application bundle/package
    pub client: String,
    pub status: PermissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebVisitRecord {
    pub visited_at: Option<Timestamp>,
    pub url: String,
    pub title: Option<String>,
    pub visit_count: Option<i64>,
    pub loaded: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Scene-taxonomy label with confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLabel {
    pub label: String,
    pub confidence: f32,
}

impl SceneLabel {
    /// Create a label with confidence clamped into [0, 1].
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Container-relative address of the image bytes, when recoverable
    pub media_ref: Option<String>,
    pub file_name: Option<String>,
    pub captured_at: Option<Timestamp>,
    pub added_at: Option<Timestamp>,
    pub location: Option<GeoPoint>,
    /// May be empty; classification failure is not fatal
    pub scene_labels: Vec<SceneLabel>,
    /// Perceptual hash for investigator-side duplicate spotting
    pub perceptual_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    pub description: Option<String>,
    pub created_at: Option<Timestamp>,
}

/// A resolved identity: the handles the correlation pass merged together
/// and every record that references one of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntity {
    pub entity_id: String,
    pub display_name: Option<String>,
    pub handles: BTreeSet<String>,
    pub record_ids: BTreeSet<String>,
}

/// Messages/calls sharing one resolved participant set, in timestamp
/// order. Direction-insensitive: A↔B is a single conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntity {
    pub entity_id: String,
    pub participant_entity_ids: BTreeSet<String>,
    /// Member record IDs ordered by timestamp, then record id
    pub record_ids: Vec<String>,
}

/// Device identity extracted once per run (Info.plist or tree probing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub platform: Option<Platform>,
    pub device_name: Option<String>,
    pub model: Option<String>,
    pub phone_number: Option<String>,
    pub imei: Option<String>,
    pub serial_number: Option<String>,
    pub os_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_are_stable_and_distinct() {
        let a = record_id("HomeDomain/Library/SMS/sms.db", "message:42");
        let b = record_id("HomeDomain/Library/SMS/sms.db", "message:42");
        let c = record_id("HomeDomain/Library/SMS/sms.db", "message:43");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn entity_id_depends_on_member_order_input_sorted_by_caller() {
        let a = entity_id(["+15551230000", "alex@example.com"]);
        let b = entity_id(["+15551230000", "alex@example.com"]);
        assert_eq!(a, b);
    }

    #[test]
    fn scene_label_confidence_is_clamped() {
        assert_eq!(SceneLabel::new("weapon", 1.5).confidence, 1.0);
        assert_eq!(SceneLabel::new("weapon", -0.5).confidence, 0.0);
    }

    #[test]
    fn contact_handles_cover_phones_and_emails() {
        let contact = ContactRecord {
            display_name: Some("Alex".into()),
            phones: vec![PhoneEntry {
                label: "Mobile".into(),
                number: "+15551230000".into(),
            }],
            emails: vec!["alex@example.com".into()],
            ..Default::default()
        };
        assert_eq!(contact.handles().len(), 2);
    }

    #[test]
    fn artifact_kind_parse_accepts_aliases() {
        assert_eq!(ArtifactKind::parse("SMS"), Some(ArtifactKind::Messages));
        assert_eq!(ArtifactKind::parse("browsing"), Some(ArtifactKind::WebHistory));
        assert_eq!(ArtifactKind::parse("nope"), None);
    }
}
