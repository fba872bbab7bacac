//! Format adapters: one per artifact family.
//!
//! Each adapter reads its family's source (staged by a container reader)
//! and emits canonical records. Parsing is a pure function of the
//! source bytes: re-invoking `parse` on the same source yields the same
//! sequence, with no cross-record state retained between runs.
//!
//! Error posture, from most to least severe:
//! - the source cannot be opened or its expected table is absent →
//!   `AdapterError`; the pipeline records a source-level diagnostic and
//!   the family yields zero records from that source
//! - one row is malformed → the record is emitted best-effort with a
//!   `RecordParseError` diagnostic, or the row is skipped and counted;
//!   the sequence continues
//! - a timestamp is implausible → flagged `ImplausibleTimestamp` on the
//!   record, never rejected
//!
//! Every timestamp field names its source epoch explicitly at the call
//! site. That declaration is the contract with the normalizer; nothing
//! here infers an epoch from value magnitude.

pub mod accounts;
pub mod apps;
pub mod calls;
pub mod contacts;
pub mod messages;
pub mod permissions;
pub mod photos;
pub mod sqlite;
pub mod web_history;

use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::diag::Diagnostic;
use galena_common::records::{ArtifactKind, CanonicalRecord, Platform, Provenance};
use galena_common::time::{RawTime, SourceEpoch, TimeNormalizer, Timestamp};
use thiserror::Error;

/// Shared per-run context handed to every adapter invocation.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub normalizer: TimeNormalizer,
    pub platform: Platform,
    pub os_version: Option<String>,
}

impl AdapterContext {
    /// Provenance descriptor for a record from the given source/table.
    pub fn provenance(&self, source: &StagedSource, table: Option<&str>) -> Provenance {
        Provenance {
            source_path: source.descriptor.logical_path.clone(),
            source_table: table.map(String::from),
            platform: self.platform,
            os_version: self.os_version.clone(),
        }
    }
}

/// Source-level adapter failure. Emitting this means the source yielded
/// zero records; the pipeline demotes it to a run-summary diagnostic.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("cannot open source: {0}")]
    Open(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("source format not understood: {0}")]
    Format(String),
}

impl From<sqlx::Error> for AdapterError {
    fn from(e: sqlx::Error) -> Self {
        AdapterError::Query(e.to_string())
    }
}

/// Records plus the count of rows too malformed to carry one.
#[derive(Debug, Default)]
pub struct AdapterOutput {
    pub records: Vec<CanonicalRecord>,
    pub skipped_rows: u64,
}

impl AdapterOutput {
    pub fn push(&mut self, record: CanonicalRecord) {
        self.records.push(record);
    }

    pub fn skip(&mut self, table: &str, detail: impl std::fmt::Display) {
        tracing::warn!(table, %detail, "Skipping malformed row");
        self.skipped_rows += 1;
    }
}

/// One adapter per artifact family, covering both platforms' source
/// schemas behind a fixed canonical output shape.
#[async_trait]
pub trait ArtifactAdapter: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Adapter name for provenance and logging.
    fn name(&self) -> &'static str;

    /// Parse one staged source into canonical records.
    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError>;
}

/// Adapter registry, one entry per family.
pub fn adapter_for(kind: ArtifactKind) -> Box<dyn ArtifactAdapter> {
    match kind {
        ArtifactKind::Contacts => Box::new(contacts::ContactsAdapter),
        ArtifactKind::Messages => Box::new(messages::MessagesAdapter),
        ArtifactKind::Calls => Box::new(calls::CallsAdapter),
        ArtifactKind::Apps => Box::new(apps::AppsAdapter),
        ArtifactKind::Permissions => Box::new(permissions::PermissionsAdapter),
        ArtifactKind::WebHistory => Box::new(web_history::WebHistoryAdapter),
        ArtifactKind::Photos => Box::new(photos::PhotosAdapter),
        ArtifactKind::Accounts => Box::new(accounts::AccountsAdapter),
    }
}

/// Normalize an optional raw timestamp, flagging implausible values on
/// the record's diagnostics. Zero is the universal "never set" marker in
/// these stores and maps to `None` rather than the epoch date.
pub(crate) fn normalized_time(
    ctx: &AdapterContext,
    raw: Option<RawTime>,
    epoch: SourceEpoch,
    field: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Timestamp> {
    let raw = raw?;
    let unset = matches!(raw, RawTime::Int(0)) || matches!(raw, RawTime::Real(v) if v == 0.0);
    if unset {
        return None;
    }
    let ts = ctx.normalizer.normalize(raw, epoch);
    if ts.implausible() {
        diagnostics.push(Diagnostic::implausible_timestamp(field, raw));
    }
    Some(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx() -> AdapterContext {
        AdapterContext {
            normalizer: TimeNormalizer::with_reference(
                None,
                Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            ),
            platform: Platform::Ios,
            os_version: None,
        }
    }

    #[test]
    fn zero_raw_time_is_unset_not_epoch() {
        let mut diags = Vec::new();
        let ts = normalized_time(
            &ctx(),
            Some(RawTime::Int(0)),
            SourceEpoch::CocoaSeconds,
            "date",
            &mut diags,
        );
        assert!(ts.is_none());
        assert!(diags.is_empty());
    }

    #[test]
    fn implausible_time_is_flagged_and_kept() {
        let mut diags = Vec::new();
        let ts = normalized_time(
            &ctx(),
            Some(RawTime::Int(12)),
            SourceEpoch::UnixSeconds,
            "date",
            &mut diags,
        )
        .unwrap();
        assert!(ts.implausible());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn registry_covers_every_kind() {
        for kind in ArtifactKind::ALL {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }
}
