//! Artifact store: the canonical record warehouse downstream consumers
//! read from.
//!
//! Append-only for the duration of a run and safe for concurrent append
//! from adapter tasks; the hash-based record IDs make appends
//! collision-free and re-runs idempotent. The correlation pass adds
//! entity groupings referencing existing IDs — it never rewrites a
//! record. The store is discarded and rebuilt on re-run; there is no
//! incremental update model.

use galena_common::diag::{Diagnostic, DiagnosticKind, RunSummary};
use galena_common::records::{
    ArtifactKind, CanonicalRecord, ContactEntity, ConversationEntity,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::warn;

/// Sort order for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Primary timestamp, undated records first; record id tie-break
    #[default]
    Timestamp,
    /// Stable hash id
    RecordId,
}

/// Listing filter; all criteria are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    /// Case-insensitive substring over the record's text fields
    pub text: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, CanonicalRecord>,
    contacts: BTreeMap<String, ContactEntity>,
    conversations: BTreeMap<String, ConversationEntity>,
    summary: RunSummary,
}

pub struct ArtifactStore {
    inner: RwLock<Inner>,
    include_implausible: bool,
}

impl ArtifactStore {
    pub fn new(include_implausible: bool) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            include_implausible,
        }
    }

    /// Append one record. A duplicate ID (same source row re-parsed) is
    /// dropped, keeping the first occurrence.
    pub fn append(&self, record: CanonicalRecord) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.records.contains_key(&record.record_id) {
            warn!(record_id = %record.record_id, "Duplicate record id dropped");
            return;
        }
        inner.summary.record_added(record.kind, &record.diagnostics);
        inner.records.insert(record.record_id.clone(), record);
    }

    /// Count rows an adapter skipped as unparseable.
    pub fn note_skipped(&self, kind: ArtifactKind, rows: u64) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        for _ in 0..rows {
            inner.summary.record_skipped(kind);
        }
    }

    /// Record a source-level diagnostic (missing/unopenable source).
    pub fn source_diagnostic(
        &self,
        kind: ArtifactKind,
        source: impl Into<String>,
        diagnostic: Diagnostic,
    ) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.summary.source_diagnostic(kind, source, diagnostic);
    }

    /// Install the correlation output. Called once, after the barrier.
    pub fn set_entities(
        &self,
        contacts: Vec<ContactEntity>,
        conversations: Vec<ConversationEntity>,
    ) {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.contacts = contacts
            .into_iter()
            .map(|c| (c.entity_id.clone(), c))
            .collect();
        inner.conversations = conversations
            .into_iter()
            .map(|c| (c.entity_id.clone(), c))
            .collect();
    }

    /// Ordered listing for one artifact family.
    pub fn list_artifacts(
        &self,
        kind: ArtifactKind,
        filter: &ArtifactFilter,
        sort: SortKey,
    ) -> Vec<CanonicalRecord> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut records: Vec<CanonicalRecord> = inner
            .records
            .values()
            .filter(|r| r.kind == kind)
            .filter(|r| self.include_implausible || !has_implausible(r))
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        match sort {
            SortKey::Timestamp => records.sort_by(|a, b| {
                let ta = a.timestamp().map(|t| t.utc);
                let tb = b.timestamp().map(|t| t.utc);
                ta.cmp(&tb).then_with(|| a.record_id.cmp(&b.record_id))
            }),
            SortKey::RecordId => records.sort_by(|a, b| a.record_id.cmp(&b.record_id)),
        }
        records
    }

    pub fn contact(&self, entity_id: &str) -> Option<ContactEntity> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .contacts
            .get(entity_id)
            .cloned()
    }

    pub fn conversation(&self, entity_id: &str) -> Option<ConversationEntity> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .conversations
            .get(entity_id)
            .cloned()
    }

    pub fn contacts(&self) -> Vec<ContactEntity> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .contacts
            .values()
            .cloned()
            .collect()
    }

    pub fn conversations(&self) -> Vec<ConversationEntity> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .conversations
            .values()
            .cloned()
            .collect()
    }

    /// Per-run diagnostic summary for the report writer and the UI.
    pub fn summary(&self) -> RunSummary {
        self.inner.read().expect("store lock poisoned").summary.clone()
    }

    /// Every stored record, in id order. Correlation input and the
    /// idempotence tests both want the full batch.
    pub fn snapshot(&self) -> Vec<CanonicalRecord> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .records
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn has_implausible(record: &CanonicalRecord) -> bool {
    record
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::ImplausibleTimestamp)
}

fn matches_filter(record: &CanonicalRecord, filter: &ArtifactFilter) -> bool {
    if let Some(text) = &filter.text {
        let needle = text.to_lowercase();
        let hit = record
            .text_fields()
            .iter()
            .any(|f| f.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }

    if filter.since.is_some() || filter.until.is_some() {
        let Some(ts) = record.timestamp() else {
            // Date-bounded listings exclude undated records
            return false;
        };
        if let Some(since) = filter.since {
            if ts.utc < since {
                return false;
            }
        }
        if let Some(until) = filter.until {
            if ts.utc > until {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use galena_common::records::{record_id, Platform, Provenance, RecordBody, WebVisitRecord};
    use galena_common::time::{SourceEpoch, TimeNormalizer};
    use chrono::TimeZone;

    fn visit(row: &str, url: &str, unix_secs: Option<i64>) -> CanonicalRecord {
        let normalizer = TimeNormalizer::with_reference(
            None,
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        );
        let mut diagnostics = Vec::new();
        let visited_at = unix_secs.map(|s| {
            let ts = normalizer.normalize(s, SourceEpoch::UnixSeconds);
            if ts.implausible() {
                diagnostics.push(Diagnostic::implausible_timestamp("visit", s));
            }
            ts
        });
        CanonicalRecord {
            record_id: record_id("history", row),
            kind: ArtifactKind::WebHistory,
            provenance: Provenance {
                source_path: "history".to_string(),
                source_table: None,
                platform: Platform::Ios,
                os_version: None,
            },
            diagnostics,
            body: RecordBody::WebVisit(WebVisitRecord {
                visited_at,
                url: url.to_string(),
                title: None,
                visit_count: None,
                loaded: None,
            }),
        }
    }

    #[test]
    fn listing_sorts_by_timestamp_then_id() {
        let store = ArtifactStore::new(true);
        store.append(visit("b", "https://late.example", Some(1_700_000_000)));
        store.append(visit("a", "https://early.example", Some(1_600_000_000)));
        store.append(visit("c", "https://undated.example", None));

        let listed = store.list_artifacts(
            ArtifactKind::WebHistory,
            &ArtifactFilter::default(),
            SortKey::Timestamp,
        );
        let urls: Vec<&str> = listed
            .iter()
            .map(|r| match &r.body {
                RecordBody::WebVisit(v) => v.url.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://undated.example",
                "https://early.example",
                "https://late.example"
            ]
        );
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let store = ArtifactStore::new(true);
        store.append(visit("a", "https://first.example", None));
        store.append(visit("a", "https://second.example", None));
        assert_eq!(store.len(), 1);
        assert_eq!(store.summary().records(ArtifactKind::WebHistory), 1);
    }

    #[test]
    fn text_filter_is_case_insensitive() {
        let store = ArtifactStore::new(true);
        store.append(visit("a", "https://Example.com/Page", None));
        store.append(visit("b", "https://other.net", None));

        let filter = ArtifactFilter {
            text: Some("example.com".to_string()),
            ..Default::default()
        };
        let listed = store.list_artifacts(ArtifactKind::WebHistory, &filter, SortKey::RecordId);
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn implausible_records_can_be_excluded() {
        let flagged = ArtifactStore::new(false);
        // 1990: before the sane window
        flagged.append(visit("a", "https://old.example", Some(650_000_000)));
        flagged.append(visit("b", "https://fine.example", Some(1_700_000_000)));
        assert_eq!(
            flagged
                .list_artifacts(
                    ArtifactKind::WebHistory,
                    &ArtifactFilter::default(),
                    SortKey::RecordId
                )
                .len(),
            1
        );

        // Default posture keeps them visible
        let unflagged = ArtifactStore::new(true);
        unflagged.append(visit("a", "https://old.example", Some(650_000_000)));
        assert_eq!(
            unflagged
                .list_artifacts(
                    ArtifactKind::WebHistory,
                    &ArtifactFilter::default(),
                    SortKey::RecordId
                )
                .len(),
            1
        );
    }

    #[test]
    fn date_bounds_apply() {
        let store = ArtifactStore::new(true);
        store.append(visit("a", "https://early.example", Some(1_600_000_000)));
        store.append(visit("b", "https://late.example", Some(1_700_000_000)));

        let filter = ArtifactFilter {
            since: Some(Utc.timestamp_opt(1_650_000_000, 0).unwrap()),
            ..Default::default()
        };
        let listed = store.list_artifacts(ArtifactKind::WebHistory, &filter, SortKey::RecordId);
        assert_eq!(listed.len(), 1);
    }
}
