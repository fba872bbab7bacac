//! Contacts adapter: iOS AddressBook.sqlitedb and Android contacts2.db.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, CanonicalRecord, ContactRecord, PhoneEntry, Platform, RecordBody,
};
use galena_common::time::{RawTime, SourceEpoch};
use std::collections::BTreeMap;
use tracing::debug;

/// iOS address-book query. Phone numbers hang off ABMultiValue rows
/// (property 3) keyed by label; email is property 4 with a null label.
const IOS_QUERY: &str = r#"
SELECT
    ABPerson.ROWID AS person_rowid,
    ABPerson.First AS first_name,
    ABPerson.Last AS last_name,
    ABPerson.CreationDate AS creation_date,
    (SELECT value FROM ABMultiValue WHERE property = 3 AND record_id = ABPerson.ROWID AND
        label = (SELECT ROWID FROM ABMultiValueLabel WHERE value = '_$!<Main>!$_')) AS phone_main,
    (SELECT value FROM ABMultiValue WHERE property = 3 AND record_id = ABPerson.ROWID AND
        label = (SELECT ROWID FROM ABMultiValueLabel WHERE value = 'iPhone')) AS phone_iphone,
    (SELECT value FROM ABMultiValue WHERE property = 3 AND record_id = ABPerson.ROWID AND
        label = (SELECT ROWID FROM ABMultiValueLabel WHERE value = '_$!<Mobile>!$_')) AS phone_mobile,
    (SELECT value FROM ABMultiValue WHERE property = 3 AND record_id = ABPerson.ROWID AND
        label = (SELECT ROWID FROM ABMultiValueLabel WHERE value = '_$!<Home>!$_')) AS phone_home,
    (SELECT value FROM ABMultiValue WHERE property = 3 AND record_id = ABPerson.ROWID AND
        label = (SELECT ROWID FROM ABMultiValueLabel WHERE value = '_$!<Work>!$_')) AS phone_work,
    (SELECT value FROM ABMultiValue WHERE property = 4 AND record_id = ABPerson.ROWID AND
        label IS NULL) AS email
FROM ABPerson
ORDER BY ABPerson.ROWID
"#;

/// Android raw-contacts query: one row per data item, grouped by raw
/// contact in code.
const ANDROID_QUERY: &str = r#"
SELECT
    rc._id AS contact_rowid,
    rc.display_name AS display_name,
    m.mimetype AS mimetype,
    d.data1 AS data1,
    d.data2 AS data2,
    d.data3 AS data3
FROM raw_contacts rc
JOIN data d ON d.raw_contact_id = rc._id
JOIN mimetypes m ON d.mimetype_id = m._id
WHERE rc.deleted = 0 AND d.data1 IS NOT NULL
ORDER BY rc._id, d._id
"#;

pub struct ContactsAdapter;

#[async_trait]
impl ArtifactAdapter for ContactsAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Contacts
    }

    fn name(&self) -> &'static str {
        "contacts"
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
    sqlite::require_table(&pool, "ABPerson").await?;

    let rows = sqlx::query(IOS_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "person_rowid") else {
            output.skip("ABPerson", "row without ROWID");
            continue;
        };

        let mut diagnostics = Vec::new();
        let first_name = text_value(row, "first_name");
        let last_name = text_value(row, "last_name");

        let mut phones = Vec::new();
        for (label, column) in [
            ("Main", "phone_main"),
            ("iPhone", "phone_iphone"),
            ("Mobile", "phone_mobile"),
            ("Home", "phone_home"),
            ("Work", "phone_work"),
        ] {
            if let Some(number) = text_value(row, column) {
                phones.push(PhoneEntry {
                    label: label.to_string(),
                    number,
                });
            }
        }

        let emails = text_value(row, "email").into_iter().collect::<Vec<_>>();
        let created_at = normalized_time(
            ctx,
            real_value(row, "creation_date").map(RawTime::Real),
            SourceEpoch::CocoaSeconds,
            "ABPerson.CreationDate",
            &mut diagnostics,
        );

        let display_name = compose_name(first_name.as_deref(), last_name.as_deref());

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("ABPerson:{rowid}")),
            kind: ArtifactKind::Contacts,
            provenance: ctx.provenance(source, Some("ABPerson")),
            diagnostics,
            body: RecordBody::Contact(ContactRecord {
                display_name,
                first_name,
                last_name,
                phones,
                emails,
                created_at,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed iOS address book");
    Ok(output)
}

async fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "raw_contacts").await?;

    let rows = sqlx::query(ANDROID_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    // Group data rows per raw contact; BTreeMap keeps emission order
    // stable across runs
    let mut grouped: BTreeMap<i64, ContactRecord> = BTreeMap::new();
    for row in &rows {
        let Some(rowid) = int_value(row, "contact_rowid") else {
            output.skip("raw_contacts", "data row without contact id");
            continue;
        };
        let entry = grouped.entry(rowid).or_insert_with(|| ContactRecord {
            display_name: text_value(row, "display_name"),
            ..Default::default()
        });

        let Some(mimetype) = text_value(row, "mimetype") else {
            continue;
        };
        let Some(data1) = text_value(row, "data1") else {
            continue;
        };
        match mimetype.as_str() {
            "vnd.android.cursor.item/phone_v2" => entry.phones.push(PhoneEntry {
                label: phone_type_label(int_value(row, "data2")),
                number: data1,
            }),
            "vnd.android.cursor.item/email_v2" => entry.emails.push(data1),
            "vnd.android.cursor.item/name" => {
                // data2/data3 are given/family name on the name row
                entry.first_name = text_value(row, "data2");
                entry.last_name = text_value(row, "data3");
            }
            _ => {}
        }
    }

    for (rowid, contact) in grouped {
        output.push(CanonicalRecord {
            record_id: record_id(
                &source.descriptor.logical_path,
                &format!("raw_contacts:{rowid}"),
            ),
            kind: ArtifactKind::Contacts,
            provenance: ctx.provenance(source, Some("raw_contacts")),
            diagnostics: Vec::new(),
            body: RecordBody::Contact(contact),
        });
    }

    debug!(records = output.records.len(), "Parsed Android contacts");
    Ok(output)
}

fn compose_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f.to_string()),
        (None, Some(l)) => Some(l.to_string()),
        (None, None) => None,
    }
}

/// ContactsContract phone TYPE constants.
fn phone_type_label(data2: Option<i64>) -> String {
    match data2 {
        Some(1) => "Home".to_string(),
        Some(2) => "Mobile".to_string(),
        Some(3) => "Work".to_string(),
        _ => "Phone".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_composition() {
        assert_eq!(compose_name(Some("Alex"), Some("Soto")).unwrap(), "Alex Soto");
        assert_eq!(compose_name(Some("Alex"), None).unwrap(), "Alex");
        assert_eq!(compose_name(None, Some("Soto")).unwrap(), "Soto");
        assert!(compose_name(None, None).is_none());
    }

    #[test]
    fn android_phone_labels() {
        assert_eq!(phone_type_label(Some(2)), "Mobile");
        assert_eq!(phone_type_label(Some(99)), "Phone");
        assert_eq!(phone_type_label(None), "Phone");
    }
}
