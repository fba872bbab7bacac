//! Non-fatal diagnostics and the per-run summary.
//!
//! Only [`crate::error::ContainerError`] aborts a run. Everything else a
//! triage pass encounters — a missing table, a malformed row, an
//! out-of-window timestamp, an undecodable image — is recorded here and
//! surfaced to the investigator instead of being dropped.

use crate::records::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of a non-fatal issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// An expected source table/file was absent from the container
    SourceMissing,
    /// One row/entry was malformed; record is best-effort filled or skipped
    RecordParseError,
    /// A timestamp fell outside the sane forensic window; flagged, kept
    ImplausibleTimestamp,
    /// Photo classification could not run; label set left empty
    ClassificationFailure,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::SourceMissing => "source_missing",
            DiagnosticKind::RecordParseError => "record_parse_error",
            DiagnosticKind::ImplausibleTimestamp => "implausible_timestamp",
            DiagnosticKind::ClassificationFailure => "classification_failure",
        }
    }
}

/// One non-fatal issue, attached to a record or to the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl Diagnostic {
    pub fn source_missing(detail: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::SourceMissing,
            detail: detail.into(),
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::RecordParseError,
            detail: detail.into(),
        }
    }

    pub fn implausible_timestamp(field: &str, raw: impl std::fmt::Display) -> Self {
        Self {
            kind: DiagnosticKind::ImplausibleTimestamp,
            detail: format!("{field}: raw value {raw} outside sane window"),
        }
    }

    pub fn classification_failure(detail: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::ClassificationFailure,
            detail: detail.into(),
        }
    }
}

/// A source-level diagnostic: the artifact family it affected and the
/// source that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDiagnostic {
    pub kind: ArtifactKind,
    pub source: String,
    pub diagnostic: Diagnostic,
}

/// Per-run roll-up consumed by the report writer and the review UI.
///
/// Counts use ordered maps so two runs over the same container serialize
/// byte-identically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Emitted records per artifact family
    pub records_by_kind: BTreeMap<ArtifactKind, u64>,
    /// Rows skipped outright (too malformed to carry a record) per family
    pub skipped_by_kind: BTreeMap<ArtifactKind, u64>,
    /// Record-level diagnostics per family, grouped by diagnostic type
    pub diagnostics_by_kind: BTreeMap<ArtifactKind, BTreeMap<DiagnosticKind, u64>>,
    /// Source-level diagnostics (missing tables, unopenable files)
    pub source_diagnostics: Vec<SourceDiagnostic>,
}

impl RunSummary {
    pub fn record_added(&mut self, kind: ArtifactKind, diagnostics: &[Diagnostic]) {
        *self.records_by_kind.entry(kind).or_default() += 1;
        for diag in diagnostics {
            *self
                .diagnostics_by_kind
                .entry(kind)
                .or_default()
                .entry(diag.kind)
                .or_default() += 1;
        }
    }

    pub fn record_skipped(&mut self, kind: ArtifactKind) {
        *self.skipped_by_kind.entry(kind).or_default() += 1;
        *self
            .diagnostics_by_kind
            .entry(kind)
            .or_default()
            .entry(DiagnosticKind::RecordParseError)
            .or_default() += 1;
    }

    pub fn source_diagnostic(
        &mut self,
        kind: ArtifactKind,
        source: impl Into<String>,
        diagnostic: Diagnostic,
    ) {
        self.source_diagnostics.push(SourceDiagnostic {
            kind,
            source: source.into(),
            diagnostic,
        });
    }

    /// Count of source-level diagnostics of one type for one family.
    pub fn source_diagnostic_count(&self, kind: ArtifactKind, diag: DiagnosticKind) -> usize {
        self.source_diagnostics
            .iter()
            .filter(|d| d.kind == kind && d.diagnostic.kind == diag)
            .count()
    }

    pub fn records(&self, kind: ArtifactKind) -> u64 {
        self.records_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_groups_diagnostics_by_kind() {
        let mut summary = RunSummary::default();
        summary.record_added(
            ArtifactKind::Messages,
            &[Diagnostic::implausible_timestamp("date", 42)],
        );
        summary.record_added(ArtifactKind::Messages, &[]);
        summary.record_skipped(ArtifactKind::Messages);

        assert_eq!(summary.records(ArtifactKind::Messages), 2);
        assert_eq!(
            summary.diagnostics_by_kind[&ArtifactKind::Messages]
                [&DiagnosticKind::ImplausibleTimestamp],
            1
        );
        assert_eq!(
            summary.diagnostics_by_kind[&ArtifactKind::Messages]
                [&DiagnosticKind::RecordParseError],
            1
        );
    }

    #[test]
    fn source_missing_is_countable() {
        let mut summary = RunSummary::default();
        summary.source_diagnostic(
            ArtifactKind::Calls,
            "CallHistory.storedata",
            Diagnostic::source_missing("not present in manifest"),
        );
        assert_eq!(
            summary.source_diagnostic_count(ArtifactKind::Calls, DiagnosticKind::SourceMissing),
            1
        );
    }
}
