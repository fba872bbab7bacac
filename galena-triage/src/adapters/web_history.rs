//! Browsing-history adapter: Safari History.db and Chromium-family
//! History databases.
//!
//! Safari visit times are Cocoa seconds; Chromium visit times are
//! microseconds since 1601. Same family, two epochs three centuries
//! apart — declared per query, never inferred.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, CanonicalRecord, Platform, RecordBody, WebVisitRecord,
};
use galena_common::time::{RawTime, SourceEpoch};
use tracing::debug;

const SAFARI_QUERY: &str = r#"
SELECT
    history_visits.id AS visit_id,
    history_visits.visit_time AS visit_time,
    history_visits.title AS title,
    history_visits.load_successful AS load_successful,
    history_items.url AS url,
    history_items.visit_count AS visit_count
FROM history_visits
LEFT JOIN history_items ON history_items.id = history_visits.history_item
ORDER BY history_visits.id
"#;

const CHROMIUM_QUERY: &str = r#"
SELECT
    visits.id AS visit_id,
    visits.visit_time AS visit_time,
    urls.url AS url,
    urls.title AS title,
    urls.visit_count AS visit_count
FROM visits
LEFT JOIN urls ON urls.id = visits.url
ORDER BY visits.id
"#;

pub struct WebHistoryAdapter;

#[async_trait]
impl ArtifactAdapter for WebHistoryAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::WebHistory
    }

    fn name(&self) -> &'static str {
        "web_history"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        let pool = sqlite::open_readonly(&source.path).await?;

        // Schema decides the dialect, not the platform: a Chromium
        // History db can sit inside an iOS app domain too
        if sqlite::table_exists(&pool, "history_visits").await? {
            parse_safari(&pool, source, ctx).await
        } else if sqlite::table_exists(&pool, "visits").await? {
            parse_chromium(&pool, source, ctx).await
        } else {
            Err(AdapterError::Format(
                "no recognizable history tables".to_string(),
            ))
        }
    }
}

async fn parse_safari(
    pool: &sqlx::SqlitePool,
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let rows = sqlx::query(SAFARI_QUERY).fetch_all(pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(visit_id) = int_value(row, "visit_id") else {
            output.skip("history_visits", "visit without id");
            continue;
        };
        let Some(url) = text_value(row, "url") else {
            output.skip("history_visits", format!("visit {visit_id} without url"));
            continue;
        };

        let mut diagnostics = Vec::new();
        let visited_at = normalized_time(
            ctx,
            real_value(row, "visit_time").map(RawTime::Real),
            SourceEpoch::CocoaSeconds,
            "history_visits.visit_time",
            &mut diagnostics,
        );

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("visit:{visit_id}")),
            kind: ArtifactKind::WebHistory,
            provenance: ctx.provenance(source, Some("history_visits")),
            diagnostics,
            body: RecordBody::WebVisit(WebVisitRecord {
                visited_at,
                url,
                title: text_value(row, "title"),
                visit_count: int_value(row, "visit_count"),
                loaded: int_value(row, "load_successful").map(|v| v == 1),
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed Safari history");
    Ok(output)
}

async fn parse_chromium(
    pool: &sqlx::SqlitePool,
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let rows = sqlx::query(CHROMIUM_QUERY).fetch_all(pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(visit_id) = int_value(row, "visit_id") else {
            output.skip("visits", "visit without id");
            continue;
        };
        let Some(url) = text_value(row, "url") else {
            output.skip("visits", format!("visit {visit_id} without url"));
            continue;
        };

        let mut diagnostics = Vec::new();
        let visited_at = normalized_time(
            ctx,
            int_value(row, "visit_time").map(RawTime::Int),
            SourceEpoch::WebkitMicros,
            "visits.visit_time",
            &mut diagnostics,
        );

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("visit:{visit_id}")),
            kind: ArtifactKind::WebHistory,
            provenance: ctx.provenance(source, Some("visits")),
            diagnostics,
            body: RecordBody::WebVisit(WebVisitRecord {
                visited_at,
                url,
                title: text_value(row, "title"),
                visit_count: int_value(row, "visit_count"),
                loaded: None,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed Chromium history");
    Ok(output)
}
