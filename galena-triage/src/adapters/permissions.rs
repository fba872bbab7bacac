//! Permissions adapter: iOS TCC.db and Android runtime-permissions.xml.

use super::sqlite::{self, int_value, text_value};
use super::{AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, CanonicalRecord, PermissionRecord, PermissionStatus, Platform,
    RecordBody,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

/// Modern TCC schema; iOS 11+ renamed the old `allowed` column to
/// `auth_value`.
const IOS_QUERY: &str = r#"
SELECT service, client, auth_value
FROM access
ORDER BY service, client
"#;

const IOS_QUERY_LEGACY: &str = r#"
SELECT service, client, allowed AS auth_value
FROM access
ORDER BY service, client
"#;

pub struct PermissionsAdapter;

#[async_trait]
impl ArtifactAdapter for PermissionsAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Permissions
    }

    fn name(&self) -> &'static str {
        "permissions"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        match ctx.platform {
            Platform::Ios => parse_ios(source, ctx).await,
            Platform::Android | Platform::Unknown => parse_android(source, ctx),
        }
    }
}

async fn parse_ios(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "access").await?;

    let rows = match sqlx::query(IOS_QUERY).fetch_all(&pool).await {
        Ok(rows) => rows,
        // Pre-iOS-11 schema
        Err(_) => sqlx::query(IOS_QUERY_LEGACY).fetch_all(&pool).await?,
    };

    let mut output = AdapterOutput::default();
    for row in &rows {
        let (Some(service), Some(client)) = (text_value(row, "service"), text_value(row, "client"))
        else {
            output.skip("access", "row without service/client");
            continue;
        };

        // auth_value: 0 denied, 1 unknown, 2 granted, 3 limited
        let status = match int_value(row, "auth_value") {
            Some(0) => PermissionStatus::Denied,
            Some(1) => PermissionStatus::Unknown,
            Some(2) => PermissionStatus::Granted,
            Some(3) => PermissionStatus::Limited,
            Some(other) => PermissionStatus::Other(other),
            None => PermissionStatus::Unknown,
        };

        output.push(CanonicalRecord {
            record_id: record_id(
                &source.descriptor.logical_path,
                &format!("access:{service}:{client}"),
            ),
            kind: ArtifactKind::Permissions,
            provenance: ctx.provenance(source, Some("access")),
            diagnostics: Vec::new(),
            body: RecordBody::Permission(PermissionRecord {
                service,
                client,
                status,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed iOS TCC permissions");
    Ok(output)
}

fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let mut reader = Reader::from_file(&source.path)
        .map_err(|e| AdapterError::Open(format!("runtime-permissions.xml: {e}")))?;

    let mut output = AdapterOutput::default();
    let mut buf = Vec::new();
    let mut current_pkg: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.name().as_ref() == b"pkg" => {
                current_pkg = attribute(&element, b"name");
            }
            Ok(Event::End(element)) if element.name().as_ref() == b"pkg" => {
                current_pkg = None;
            }
            Ok(Event::Start(element)) | Ok(Event::Empty(element))
                if element.name().as_ref() == b"item" =>
            {
                let Some(client) = current_pkg.clone() else {
                    // item outside a pkg block (shared-user section)
                    continue;
                };
                let Some(service) = attribute(&element, b"name") else {
                    output.skip("item", "permission item without name");
                    continue;
                };
                let granted = attribute(&element, b"granted")
                    .map(|v| v == "true")
                    .unwrap_or(false);

                output.push(CanonicalRecord {
                    record_id: record_id(
                        &source.descriptor.logical_path,
                        &format!("runtime:{service}:{client}"),
                    ),
                    kind: ArtifactKind::Permissions,
                    provenance: ctx.provenance(source, None),
                    diagnostics: Vec::new(),
                    body: RecordBody::Permission(PermissionRecord {
                        service,
                        client,
                        status: if granted {
                            PermissionStatus::Granted
                        } else {
                            PermissionStatus::Denied
                        },
                    }),
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AdapterError::Format(format!("runtime-permissions.xml: {e}")))
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    debug!(records = output.records.len(), "Parsed Android runtime permissions");
    Ok(output)
}

fn attribute(element: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}
