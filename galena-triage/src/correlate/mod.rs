//! Cross-artifact identity correlation.
//!
//! Handles (phone numbers, emails, account identifiers) are graph
//! nodes; an alias edge connects handles that co-occur on one
//! underlying account (all the numbers and emails of a single
//! contact-book row). Connected components, computed with union-find
//! over the immutable record batch, become merged [`ContactEntity`]s.
//! Conversations then group messages/calls by their resolved
//! participant set, direction-insensitively.
//!
//! Everything here is deterministic for a given input set: iteration
//! happens over sorted keys, names tie-break lexicographically, and
//! entity IDs are content hashes of sorted member sets. Re-running
//! correlation on the same batch yields identical groupings, which is
//! what makes repeated triage passes reproducible.

use galena_common::records::{
    entity_id, CanonicalRecord, ContactEntity, ConversationEntity, RecordBody,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Output of one correlation pass.
#[derive(Debug, Default)]
pub struct CorrelationResult {
    pub contacts: Vec<ContactEntity>,
    pub conversations: Vec<ConversationEntity>,
}

/// Canonical comparison key for a raw handle.
///
/// - emails compare lowercased
/// - phone-shaped strings compare by their trailing 10 digits, so
///   `+1 (555) 123-0000` and `5551230000` merge
/// - anything else compares verbatim
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_ascii_lowercase();
    }

    let stripped: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '+'))
        .collect();
    if stripped.len() >= 7 && stripped.chars().all(|c| c.is_ascii_digit()) {
        let digits = stripped;
        if digits.len() > 10 {
            return digits[digits.len() - 10..].to_string();
        }
        return digits;
    }

    trimmed.to_string()
}

/// Run correlation over the full record batch.
pub fn correlate(records: &[CanonicalRecord]) -> CorrelationResult {
    // Pass 1: collect every handle observation — which raw forms map to
    // each canonical key, which records reference it, and the names
    // asserted for it
    let mut raw_forms: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut referencing: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut names: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut alias_groups: Vec<Vec<String>> = Vec::new();

    let mut observe = |raw: &str,
                       record_id: &str,
                       raw_forms: &mut BTreeMap<String, BTreeSet<String>>,
                       referencing: &mut BTreeMap<String, BTreeSet<String>>|
     -> Option<String> {
        if raw.trim().is_empty() {
            return None;
        }
        let key = normalize_handle(raw);
        raw_forms
            .entry(key.clone())
            .or_default()
            .insert(raw.trim().to_string());
        referencing
            .entry(key.clone())
            .or_default()
            .insert(record_id.to_string());
        Some(key)
    };

    for record in records {
        match &record.body {
            RecordBody::Contact(contact) => {
                let mut keys = Vec::new();
                for handle in contact.handles() {
                    if let Some(key) =
                        observe(&handle, &record.record_id, &mut raw_forms, &mut referencing)
                    {
                        keys.push(key);
                    }
                }
                if let Some(name) = &contact.display_name {
                    for key in &keys {
                        *names
                            .entry(key.clone())
                            .or_default()
                            .entry(name.clone())
                            .or_default() += 1;
                    }
                }
                // Every handle on one contact row aliases one person
                if keys.len() > 1 {
                    alias_groups.push(keys);
                }
            }
            RecordBody::Message(message) => {
                // Participants of a group chat are distinct people; they
                // are referenced, never aliased
                for participant in &message.participants {
                    observe(participant, &record.record_id, &mut raw_forms, &mut referencing);
                }
                if let Some(sender) = &message.sender {
                    observe(sender, &record.record_id, &mut raw_forms, &mut referencing);
                }
            }
            RecordBody::Call(call) => {
                if let Some(party) = &call.party {
                    observe(party, &record.record_id, &mut raw_forms, &mut referencing);
                }
            }
            RecordBody::Account(account) => {
                observe(&account.username, &record.record_id, &mut raw_forms, &mut referencing);
            }
            _ => {}
        }
    }

    // Pass 2: union-find over canonical keys
    let keys: Vec<String> = raw_forms.keys().cloned().collect();
    let index: BTreeMap<&str, usize> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();
    let mut dsu = Dsu::new(keys.len());
    for group in &alias_groups {
        let first = index[group[0].as_str()];
        for key in &group[1..] {
            dsu.union(first, index[key.as_str()]);
        }
    }

    // Pass 3: components → merged entities
    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..keys.len() {
        components.entry(dsu.find(i)).or_default().push(i);
    }

    let mut contacts = Vec::new();
    let mut entity_by_key: BTreeMap<String, String> = BTreeMap::new();
    for members in components.values() {
        let member_keys: BTreeSet<&str> = members.iter().map(|&i| keys[i].as_str()).collect();

        let mut handles = BTreeSet::new();
        let mut record_ids = BTreeSet::new();
        let mut name_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for key in &member_keys {
            if let Some(forms) = raw_forms.get(*key) {
                handles.extend(forms.iter().cloned());
            }
            if let Some(ids) = referencing.get(*key) {
                record_ids.extend(ids.iter().cloned());
            }
            if let Some(counts) = names.get(*key) {
                for (name, count) in counts {
                    *name_counts.entry(name.as_str()).or_default() += count;
                }
            }
        }

        // Most frequent non-null name; ties break to the
        // lexicographically smallest (map iteration is already sorted)
        let display_name = name_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(name, _)| name.to_string());

        let id = entity_id(member_keys.iter().copied());
        for key in &member_keys {
            entity_by_key.insert(key.to_string(), id.clone());
        }
        contacts.push(ContactEntity {
            entity_id: id,
            display_name,
            handles,
            record_ids,
        });
    }
    contacts.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    // Pass 4: conversations grouped by resolved participant set
    let mut conversations: BTreeMap<BTreeSet<String>, Vec<&CanonicalRecord>> = BTreeMap::new();
    for record in records {
        let participant_handles: Vec<&String> = match &record.body {
            RecordBody::Message(message) => message.participants.iter().collect(),
            RecordBody::Call(call) => call.party.iter().collect(),
            _ => continue,
        };
        let participant_ids: BTreeSet<String> = participant_handles
            .iter()
            .filter_map(|h| entity_by_key.get(&normalize_handle(h)).cloned())
            .collect();
        if participant_ids.is_empty() {
            continue;
        }
        conversations.entry(participant_ids).or_default().push(record);
    }

    let conversations = conversations
        .into_iter()
        .map(|(participant_entity_ids, mut members)| {
            // Timestamp order; record id tie-breaks for identical times
            members.sort_by(|a, b| {
                let ta = a.timestamp().map(|t| t.utc);
                let tb = b.timestamp().map(|t| t.utc);
                ta.cmp(&tb).then_with(|| a.record_id.cmp(&b.record_id))
            });
            let record_ids: Vec<String> =
                members.iter().map(|r| r.record_id.clone()).collect();
            let id_input: Vec<&str> = std::iter::once("conversation")
                .chain(participant_entity_ids.iter().map(|s| s.as_str()))
                .collect();
            ConversationEntity {
                entity_id: entity_id(id_input),
                participant_entity_ids,
                record_ids,
            }
        })
        .collect::<Vec<_>>();

    info!(
        entities = contacts.len(),
        conversations = conversations.len(),
        "Correlation pass complete"
    );
    debug!(handles = keys.len(), alias_groups = alias_groups.len(), "Correlation graph size");

    CorrelationResult {
        contacts,
        conversations,
    }
}

/// Disjoint-set union with path compression and union by rank.
struct Dsu {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl Dsu {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
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
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_common::records::{
        record_id, ArtifactKind, CallRecord, CallType, ContactRecord, Direction, MessageRecord,
        PhoneEntry, Platform, Provenance,
    };

    fn provenance() -> Provenance {
        Provenance {
            source_path: "test".to_string(),
            source_table: None,
            platform: Platform::Ios,
            os_version: None,
        }
    }

    fn contact(name: &str, phones: &[&str], emails: &[&str]) -> CanonicalRecord {
        CanonicalRecord {
            record_id: record_id("contacts", name),
            kind: ArtifactKind::Contacts,
            provenance: provenance(),
            diagnostics: Vec::new(),
            body: RecordBody::Contact(ContactRecord {
                display_name: Some(name.to_string()),
                first_name: None,
                last_name: None,
                phones: phones
                    .iter()
                    .map(|p| PhoneEntry {
                        label: "Mobile".to_string(),
                        number: p.to_string(),
                    })
                    .collect(),
                emails: emails.iter().map(|e| e.to_string()).collect(),
                created_at: None,
            }),
        }
    }

    fn message(row: &str, sender: Option<&str>, participants: &[&str]) -> CanonicalRecord {
        CanonicalRecord {
            record_id: record_id("messages", row),
            kind: ArtifactKind::Messages,
            provenance: provenance(),
            diagnostics: Vec::new(),
            body: RecordBody::Message(MessageRecord {
                sent_at: None,
                conversation_key: None,
                sender: sender.map(String::from),
                participants: participants.iter().map(|p| p.to_string()).collect(),
                direction: if sender.is_some() {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                },
                body: Some("hi".to_string()),
                service: Some("SMS".to_string()),
                is_group: false,
                group_name: None,
                attachments: Vec::new(),
                delivered: None,
                read: None,
            }),
        }
    }

    fn call(row: &str, party: &str) -> CanonicalRecord {
        CanonicalRecord {
            record_id: record_id("calls", row),
            kind: ArtifactKind::Calls,
            provenance: provenance(),
            diagnostics: Vec::new(),
            body: RecordBody::Call(CallRecord {
                occurred_at: None,
                duration_secs: Some(10),
                party: Some(party.to_string()),
                direction: Direction::Incoming,
                answered: Some(true),
                call_type: CallType::Voice,
            }),
        }
    }

    #[test]
    fn handle_normalization_merges_phone_formats() {
        assert_eq!(normalize_handle("+1 (555) 123-0000"), "5551230000");
        assert_eq!(normalize_handle("5551230000"), "5551230000");
        assert_eq!(normalize_handle("Alex@Example.com"), "alex@example.com");
        assert_eq!(normalize_handle("some.username"), "some.username");
    }

    #[test]
    fn named_contact_merges_with_unnamed_sms_sender() {
        let records = vec![
            contact("Alex", &["+15551230000"], &[]),
            message("1", Some("+15551230000"), &["+15551230000"]),
        ];
        let result = correlate(&records);

        assert_eq!(result.contacts.len(), 1);
        let entity = &result.contacts[0];
        assert_eq!(entity.display_name.as_deref(), Some("Alex"));
        // Linked to both the contact row and the message
        assert_eq!(entity.record_ids.len(), 2);
    }

    #[test]
    fn contact_row_aliases_all_its_handles() {
        let records = vec![
            contact("Alex", &["+15551230000", "+15559990000"], &["alex@example.com"]),
            call("1", "5559990000"),
            message("1", Some("alex@example.com"), &["alex@example.com"]),
        ];
        let result = correlate(&records);

        assert_eq!(result.contacts.len(), 1);
        assert_eq!(result.contacts[0].record_ids.len(), 3);
    }

    #[test]
    fn group_participants_are_not_aliased_together() {
        let records = vec![message(
            "1",
            Some("+15551110000"),
            &["+15551110000", "+15552220000"],
        )];
        let result = correlate(&records);
        // Two singleton entities, one conversation with both
        assert_eq!(result.contacts.len(), 2);
        assert_eq!(result.conversations.len(), 1);
        assert_eq!(result.conversations[0].participant_entity_ids.len(), 2);
    }

    #[test]
    fn conversations_are_direction_insensitive() {
        let records = vec![
            message("1", Some("+15551230000"), &["+15551230000"]),
            message("2", None, &["+15551230000"]),
        ];
        let result = correlate(&records);
        assert_eq!(result.conversations.len(), 1);
        assert_eq!(result.conversations[0].record_ids.len(), 2);
    }

    #[test]
    fn calls_and_messages_share_a_conversation() {
        let records = vec![
            message("1", Some("+15551230000"), &["+15551230000"]),
            call("1", "+15551230000"),
        ];
        let result = correlate(&records);
        assert_eq!(result.conversations.len(), 1);
        assert_eq!(result.conversations[0].record_ids.len(), 2);
    }

    #[test]
    fn correlation_is_deterministic_under_input_order() {
        let a = vec![
            contact("Alex", &["+15551230000"], &["alex@example.com"]),
            contact("Brit", &["+15559990000"], &[]),
            message("1", Some("+15551230000"), &["+15551230000"]),
            call("1", "+15559990000"),
        ];
        let mut b = a.clone();
        b.reverse();

        let ra = correlate(&a);
        let rb = correlate(&b);

        let ids_a: Vec<&str> = ra.contacts.iter().map(|c| c.entity_id.as_str()).collect();
        let ids_b: Vec<&str> = rb.contacts.iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);

        let conv_a: Vec<&str> = ra
            .conversations
            .iter()
            .map(|c| c.entity_id.as_str())
            .collect();
        let conv_b: Vec<&str> = rb
            .conversations
            .iter()
            .map(|c| c.entity_id.as_str())
            .collect();
        assert_eq!(conv_a, conv_b);
    }

    #[test]
    fn name_tie_breaks_lexicographically() {
        let records = vec![
            contact("Zed", &["+15551230000"], &[]),
            contact("Amy", &["+15551230000"], &[]),
        ];
        let result = correlate(&records);
        assert_eq!(result.contacts.len(), 1);
        assert_eq!(result.contacts[0].display_name.as_deref(), Some("Amy"));
    }
}
