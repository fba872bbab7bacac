//! App-inventory adapter: the iOS backup's Info.plist application list
//! and Android's packages.xml.

use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, AppRecord, ArtifactKind, CanonicalRecord, Platform, RecordBody,
};
use galena_common::time::{RawTime, SourceEpoch};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use tracing::debug;

pub struct AppsAdapter;

#[async_trait]
impl ArtifactAdapter for AppsAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Apps
    }

    fn name(&self) -> &'static str {
        "apps"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        match ctx.platform {
            Platform::Ios => parse_ios(source, ctx),
            Platform::Android | Platform::Unknown => parse_android(source, ctx),
        }
    }
}

fn parse_ios(source: &StagedSource, ctx: &AdapterContext) -> Result<AdapterOutput, AdapterError> {
    let info = plist::Value::from_file(&source.path)
        .map_err(|e| AdapterError::Open(format!("Info.plist: {e}")))?;
    let dict = info
        .as_dictionary()
        .ok_or_else(|| AdapterError::Format("Info.plist is not a dictionary".to_string()))?;

    // Union of the flat bundle-id list and the per-app metadata dict;
    // either can be present alone depending on backup age
    let mut bundles: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

    if let Some(installed) = dict
        .get("Installed Applications")
        .and_then(|v| v.as_array())
    {
        for value in installed {
            if let Some(bundle_id) = value.as_string() {
                bundles.entry(bundle_id.to_string()).or_default();
            }
        }
    }

    if let Some(applications) = dict.get("Applications").and_then(|v| v.as_dictionary()) {
        for (bundle_id, meta) in applications {
            let entry = bundles.entry(bundle_id.clone()).or_default();
            if let Some(meta) = meta.as_dictionary() {
                entry.0 = meta
                    .get("CFBundleDisplayName")
                    .and_then(|v| v.as_string())
                    .map(String::from);
                entry.1 = meta
                    .get("CFBundleShortVersionString")
                    .or_else(|| meta.get("CFBundleVersion"))
                    .and_then(|v| v.as_string())
                    .map(String::from);
            }
        }
    }

    let mut output = AdapterOutput::default();
    for (bundle_id, (name, version)) in bundles {
        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("app:{bundle_id}")),
            kind: ArtifactKind::Apps,
            provenance: ctx.provenance(source, None),
            diagnostics: Vec::new(),
            body: RecordBody::App(AppRecord {
                bundle_id,
                name,
                version,
                installed_at: None,
                updated_at: None,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed iOS app inventory");
    Ok(output)
}

fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let mut reader = Reader::from_file(&source.path)
        .map_err(|e| AdapterError::Open(format!("packages.xml: {e}")))?;

    let mut output = AdapterOutput::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) | Ok(Event::Empty(element))
                if element.name().as_ref() == b"package" =>
            {
                let mut name = None;
                let mut version = None;
                let mut installed_hex = None;
                let mut updated_hex = None;
                for attr in element.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"name" => name = Some(value),
                        b"version" => version = Some(value),
                        b"it" => installed_hex = Some(value),
                        b"ut" => updated_hex = Some(value),
                        _ => {}
                    }
                }

                let Some(bundle_id) = name else {
                    output.skip("package", "package element without name");
                    continue;
                };

                let mut diagnostics = Vec::new();
                // it/ut are hexadecimal Java milliseconds
                let installed_at = normalized_time(
                    ctx,
                    parse_hex_millis(installed_hex.as_deref()).map(RawTime::Int),
                    SourceEpoch::JavaMillis,
                    "package.it",
                    &mut diagnostics,
                );
                let updated_at = normalized_time(
                    ctx,
                    parse_hex_millis(updated_hex.as_deref()).map(RawTime::Int),
                    SourceEpoch::JavaMillis,
                    "package.ut",
                    &mut diagnostics,
                );

                output.push(CanonicalRecord {
                    record_id: record_id(
                        &source.descriptor.logical_path,
                        &format!("package:{bundle_id}"),
                    ),
                    kind: ArtifactKind::Apps,
                    provenance: ctx.provenance(source, None),
                    diagnostics,
                    body: RecordBody::App(AppRecord {
                        bundle_id,
                        name: None,
                        version,
                        installed_at,
                        updated_at,
                    }),
                });
            }
            Ok(Event::Eof) => break,
            // A binary-ABX packages.xml lands here: the whole source is
            // unusable, not one row
            Err(e) => return Err(AdapterError::Format(format!("packages.xml: {e}"))),
            Ok(_) => {}
        }
        buf.clear();
    }

    debug!(records = output.records.len(), "Parsed Android package inventory");
    Ok(output)
}

fn parse_hex_millis(value: Option<&str>) -> Option<i64> {
    i64::from_str_radix(value?, 16).ok()
}
