//! Call-history adapter: iOS CallHistory.storedata and Android
//! calllog.db.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, CallRecord, CallType, CanonicalRecord, Direction, Platform,
    RecordBody,
};
use galena_common::time::{RawTime, SourceEpoch};
use tracing::debug;

const IOS_QUERY: &str = r#"
SELECT
    Z_PK AS call_rowid,
    ZDATE AS date_raw,
    ZDURATION AS duration,
    ZADDRESS AS address,
    ZORIGINATED AS originated,
    ZANSWERED AS answered,
    ZCALLTYPE AS call_type
FROM ZCALLRECORD
ORDER BY Z_PK
"#;

const ANDROID_QUERY: &str = r#"
SELECT _id, number, date, duration, type
FROM calls
ORDER BY _id
"#;

pub struct CallsAdapter;

#[async_trait]
impl ArtifactAdapter for CallsAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Calls
    }

    fn name(&self) -> &'static str {
        "calls"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        match ctx.platform {
            Platform::Ios => parse_ios(source, ctx).await,
            Platform::Android | Platform::Unknown => parse_android(source, ctx).await,
        }
    }
}

async fn parse_ios(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "ZCALLRECORD").await?;

    let rows = sqlx::query(IOS_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "call_rowid") else {
            output.skip("ZCALLRECORD", "row without Z_PK");
            continue;
        };

        let mut diagnostics = Vec::new();
        let occurred_at = normalized_time(
            ctx,
            real_value(row, "date_raw").map(RawTime::Real),
            SourceEpoch::CocoaSeconds,
            "ZCALLRECORD.ZDATE",
            &mut diagnostics,
        );

        // ZORIGINATED: 0 incoming, 1 outgoing
        let direction = match int_value(row, "originated") {
            Some(0) => Direction::Incoming,
            Some(1) => Direction::Outgoing,
            _ => Direction::Unknown,
        };
        // ZCALLTYPE: 1 standard, 8 FaceTime video, 16 FaceTime audio
        let call_type = match int_value(row, "call_type") {
            Some(1) | None => CallType::Voice,
            Some(8) => CallType::FaceTimeVideo,
            Some(16) => CallType::FaceTimeAudio,
            Some(other) => CallType::Other(other),
        };

        output.push(CanonicalRecord {
            record_id: record_id(
                &source.descriptor.logical_path,
                &format!("ZCALLRECORD:{rowid}"),
            ),
            kind: ArtifactKind::Calls,
            provenance: ctx.provenance(source, Some("ZCALLRECORD")),
            diagnostics,
            body: RecordBody::Call(CallRecord {
                occurred_at,
                duration_secs: real_value(row, "duration").map(|d| d as i64),
                // ZADDRESS is a BLOB on many iOS versions
                party: text_value(row, "address"),
                direction,
                answered: int_value(row, "answered").map(|v| v == 1),
                call_type,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed iOS call history");
    Ok(output)
}

async fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "calls").await?;

    let rows = sqlx::query(ANDROID_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "_id") else {
            output.skip("calls", "row without _id");
            continue;
        };

        let mut diagnostics = Vec::new();
        let occurred_at = normalized_time(
            ctx,
            int_value(row, "date").map(RawTime::Int),
            SourceEpoch::JavaMillis,
            "calls.date",
            &mut diagnostics,
        );

        // CallLog.Calls.TYPE: 1 incoming, 2 outgoing, 3 missed,
        // 5 rejected, 6 blocked
        let (direction, answered) = match int_value(row, "type") {
            Some(1) => (Direction::Incoming, Some(true)),
            Some(2) => (Direction::Outgoing, None),
            Some(3) | Some(5) | Some(6) => (Direction::Incoming, Some(false)),
            _ => (Direction::Unknown, None),
        };

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("calls:{rowid}")),
            kind: ArtifactKind::Calls,
            provenance: ctx.provenance(source, Some("calls")),
            diagnostics,
            body: RecordBody::Call(CallRecord {
                occurred_at,
                duration_secs: int_value(row, "duration"),
                party: text_value(row, "number"),
                direction,
                answered,
                call_type: CallType::Voice,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed Android call log");
    Ok(output)
}
