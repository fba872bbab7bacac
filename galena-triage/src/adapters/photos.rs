//! Photo-metadata adapter: iOS Photos.sqlite and Android external.db.
//!
//! Emits photo records carrying the device's own scene-classification
//! rows (mapped through the fixed taxonomy) as the metadata signal; the
//! content signal and final aggregation happen in the classifier stage.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::classify::taxonomy_label;
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, CanonicalRecord, GeoPoint, PhotoRecord, Platform, RecordBody,
    SceneLabel,
};
use galena_common::time::{RawTime, SourceEpoch};
use std::collections::BTreeMap;
use tracing::debug;

/// One row per (asset, scene-classification) pair; assets regroup in
/// code. The photo library marks missing geotags with -180.
const IOS_QUERY: &str = r#"
SELECT
    ZASSET.Z_PK AS asset_pk,
    ZASSET.ZDIRECTORY AS directory,
    ZASSET.ZFILENAME AS filename,
    ZASSET.ZDATECREATED AS date_created,
    ZASSET.ZADDEDDATE AS added_date,
    ZASSET.ZLATITUDE AS latitude,
    ZASSET.ZLONGITUDE AS longitude,
    ZSCENECLASSIFICATION.ZSCENEIDENTIFIER AS scene_id,
    ZSCENECLASSIFICATION.ZCONFIDENCE AS scene_confidence
FROM ZASSET
LEFT JOIN ZADDITIONALASSETATTRIBUTES ON ZADDITIONALASSETATTRIBUTES.ZASSET = ZASSET.Z_PK
LEFT JOIN ZSCENECLASSIFICATION ON ZSCENECLASSIFICATION.ZASSETATTRIBUTES = ZADDITIONALASSETATTRIBUTES.Z_PK
ORDER BY ZASSET.Z_PK, ZSCENECLASSIFICATION.Z_PK
"#;

const ANDROID_QUERY: &str = r#"
SELECT _id, _data, _display_name, datetaken, date_added, latitude, longitude
FROM images
ORDER BY _id
"#;

pub struct PhotosAdapter;

#[async_trait]
impl ArtifactAdapter for PhotosAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Photos
    }

    fn name(&self) -> &'static str {
        "photos"
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
    sqlite::require_table(&pool, "ZASSET").await?;

    let rows = sqlx::query(IOS_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    // Regroup scene rows per asset; BTreeMap keeps emission order stable
    let mut assets: BTreeMap<i64, (PhotoRecord, Vec<galena_common::diag::Diagnostic>)> =
        BTreeMap::new();

    for row in &rows {
        let Some(asset_pk) = int_value(row, "asset_pk") else {
            output.skip("ZASSET", "row without Z_PK");
            continue;
        };

        let entry = assets.entry(asset_pk).or_insert_with(|| {
            let mut diagnostics = Vec::new();
            let directory = text_value(row, "directory");
            let filename = text_value(row, "filename");
            let media_ref = match (&directory, &filename) {
                (Some(dir), Some(name)) => {
                    Some(format!("CameraRollDomain-Media/{dir}/{name}"))
                }
                _ => None,
            };

            let captured_at = normalized_time(
                ctx,
                real_value(row, "date_created").map(RawTime::Real),
                SourceEpoch::CocoaSeconds,
                "ZASSET.ZDATECREATED",
                &mut diagnostics,
            );
            let added_at = normalized_time(
                ctx,
                real_value(row, "added_date").map(RawTime::Real),
                SourceEpoch::CocoaSeconds,
                "ZASSET.ZADDEDDATE",
                &mut diagnostics,
            );

            let location = geo_point(
                real_value(row, "latitude"),
                real_value(row, "longitude"),
            );

            (
                PhotoRecord {
                    media_ref,
                    file_name: filename,
                    captured_at,
                    added_at,
                    location,
                    scene_labels: Vec::new(),
                    perceptual_hash: None,
                },
                diagnostics,
            )
        });

        // Device-computed scene row, when present on this join row
        if let (Some(scene_id), Some(confidence)) = (
            int_value(row, "scene_id"),
            real_value(row, "scene_confidence"),
        ) {
            if let Some(label) = taxonomy_label(scene_id) {
                let label = SceneLabel::new(label, confidence as f32);
                if !entry.0.scene_labels.iter().any(|l| l.label == label.label) {
                    entry.0.scene_labels.push(label);
                }
            }
        }
    }

    for (asset_pk, (mut photo, diagnostics)) in assets {
        photo.scene_labels.sort_by(|a, b| a.label.cmp(&b.label));
        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("ZASSET:{asset_pk}")),
            kind: ArtifactKind::Photos,
            provenance: ctx.provenance(source, Some("ZASSET")),
            diagnostics,
            body: RecordBody::Photo(photo),
        });
    }

    debug!(records = output.records.len(), "Parsed iOS photo library");
    Ok(output)
}

async fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "images").await?;

    let rows = sqlx::query(ANDROID_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "_id") else {
            output.skip("images", "row without _id");
            continue;
        };

        let mut diagnostics = Vec::new();
        let captured_at = normalized_time(
            ctx,
            int_value(row, "datetaken").map(RawTime::Int),
            SourceEpoch::JavaMillis,
            "images.datetaken",
            &mut diagnostics,
        );
        // MediaStore's date_added is plain Unix seconds, unlike datetaken
        let added_at = normalized_time(
            ctx,
            int_value(row, "date_added").map(RawTime::Int),
            SourceEpoch::UnixSeconds,
            "images.date_added",
            &mut diagnostics,
        );

        let media_ref = text_value(row, "_data");
        let file_name = text_value(row, "_display_name").or_else(|| {
            media_ref
                .as_deref()
                .and_then(|p| p.rsplit('/').next())
                .map(String::from)
        });

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("images:{rowid}")),
            kind: ArtifactKind::Photos,
            provenance: ctx.provenance(source, Some("images")),
            diagnostics,
            body: RecordBody::Photo(PhotoRecord {
                media_ref,
                file_name,
                captured_at,
                added_at,
                location: geo_point(
                    real_value(row, "latitude"),
                    real_value(row, "longitude"),
                ),
                scene_labels: Vec::new(),
                perceptual_hash: None,
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed Android media store");
    Ok(output)
}

/// Geotag, filtering the photo library's -180/-180 "unset" sentinel and
/// out-of-range values.
fn geo_point(latitude: Option<f64>, longitude: Option<f64>) -> Option<GeoPoint> {
    let (latitude, longitude) = (latitude?, longitude?);
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    if latitude == -180.0 || longitude == -180.0 {
        return None;
    }
    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }
    Some(GeoPoint {
        latitude,
        longitude,
    })
}
