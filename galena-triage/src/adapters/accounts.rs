//! Accounts adapter: iOS Accounts3.sqlite.
//!
//! Account usernames feed the correlation pass as handles, so a mail
//! address configured on the device links up with the same address seen
//! in the contact book.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, AccountRecord, ArtifactKind, CanonicalRecord, RecordBody,
};
use galena_common::time::{RawTime, SourceEpoch};
use tracing::debug;

const IOS_QUERY: &str = r#"
SELECT
    Z_PK AS account_rowid,
    ZDATE AS date_raw,
    ZUSERNAME AS username,
    ZACCOUNTDESCRIPTION AS description
FROM ZACCOUNT
WHERE ZUSERNAME IS NOT NULL
ORDER BY Z_PK
"#;

pub struct AccountsAdapter;

#[async_trait]
impl ArtifactAdapter for AccountsAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Accounts
    }

    fn name(&self) -> &'static str {
        "accounts"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        let pool = sqlite::open_readonly(&source.path).await?;
        sqlite::require_table(&pool, "ZACCOUNT").await?;

        let rows = sqlx::query(IOS_QUERY).fetch_all(&pool).await?;
        let mut output = AdapterOutput::default();

        for row in &rows {
            let Some(rowid) = int_value(row, "account_rowid") else {
                output.skip("ZACCOUNT", "row without Z_PK");
                continue;
            };
            let Some(username) = text_value(row, "username") else {
                output.skip("ZACCOUNT", format!("account {rowid} without username"));
                continue;
            };

            let mut diagnostics = Vec::new();
            let created_at = normalized_time(
                ctx,
                real_value(row, "date_raw").map(RawTime::Real),
                SourceEpoch::CocoaSeconds,
                "ZACCOUNT.ZDATE",
                &mut diagnostics,
            );

            output.push(CanonicalRecord {
                record_id: record_id(
                    &source.descriptor.logical_path,
                    &format!("ZACCOUNT:{rowid}"),
                ),
                kind: ArtifactKind::Accounts,
                provenance: ctx.provenance(source, Some("ZACCOUNT")),
                diagnostics,
                body: RecordBody::Account(AccountRecord {
                    username,
                    description: text_value(row, "description"),
                    created_at,
                }),
            });
        }

        debug!(records = output.records.len(), "Parsed iOS accounts");
        Ok(output)
    }
}
