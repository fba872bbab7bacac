//! Photo scene classification.
//!
//! Two independent signals feed each photo's label set:
//!
//! - **metadata**: scene-classification rows the device's own photo
//!   library already computed (numeric taxonomy identifiers mapped to
//!   names below), plus cheap hints from the record itself (PNG
//!   screenshots, geotag presence)
//! - **content**: a pluggable [`ContentModel`] over the image bytes;
//!   the default is a heuristic decoder in [`content`], but anything
//!   honoring the trait can replace it (the pipeline owns only the
//!   aggregation)
//!
//! The two sets union; where both sides name the same label the higher
//! confidence wins. A photo that cannot be classified keeps an empty
//! label set and a `ClassificationFailure` diagnostic — it still lists.

pub mod content;

use galena_common::diag::Diagnostic;
use galena_common::records::{CanonicalRecord, PhotoRecord, RecordBody, SceneLabel};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Numeric scene identifiers the iOS photo library writes, mapped to
/// taxonomy names. The identifiers are Apple's; the name vocabulary is
/// shared with the content model so both signals can reinforce.
static SCENE_TAXONOMY: Lazy<HashMap<i64, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (8, "building"),
        (13, "fire"),
        (139, "atm"),
        (147, "baby"),
        (432, "credit_card"),
        (450, "currency"),
        (492, "document"),
        (554, "firearm"),
        (759, "keypad"),
        (800, "license_plate"),
        (881, "people"),
        (983, "phone"),
        (1086, "receipt"),
        (1447, "vehicle"),
        (1600, "adult"),
        (1605, "body_part"),
        (1622, "computer"),
        (1632, "weapon"),
        (1659, "military_uniform"),
        (1664, "handwriting"),
        (1665, "screenshot"),
        (1668, "laptop"),
        (1736, "child"),
        (1754, "mask"),
        (1758, "teen"),
        (1777, "underwear"),
        (2147483655, "outdoor_scene"),
    ])
});

/// Taxonomy name for a device scene identifier, if known.
pub fn taxonomy_label(scene_id: i64) -> Option<&'static str> {
    SCENE_TAXONOMY.get(&scene_id).copied()
}

/// Classification failure; never fatal to the record.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("image undecodable: {0}")]
    Undecodable(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// Output of a content model pass.
#[derive(Debug, Clone, Default)]
pub struct ContentSignal {
    pub labels: Vec<SceneLabel>,
    pub perceptual_hash: Option<String>,
}

/// Content-based classification capability.
///
/// The model is an external boundary: it can be the built-in heuristic
/// decoder, a real vision model, or a stub in tests. The pipeline never
/// depends on a specific implementation.
pub trait ContentModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, image_bytes: &[u8]) -> Result<ContentSignal, ClassifyError>;
}

/// Aggregates metadata and content signals into the final label set.
pub struct PhotoClassifier {
    model: Arc<dyn ContentModel>,
}

impl PhotoClassifier {
    pub fn new(model: Arc<dyn ContentModel>) -> Self {
        Self { model }
    }

    pub fn with_default_model() -> Self {
        Self::new(Arc::new(content::HeuristicContentModel::default()))
    }

    /// Classify one photo record in place. `image` carries the media
    /// bytes when the container could produce them; `None` means the
    /// blob was missing, which is a classification failure, not a
    /// record failure.
    pub fn classify(&self, record: &mut CanonicalRecord, image: Option<&[u8]>) {
        let RecordBody::Photo(photo) = &mut record.body else {
            return;
        };

        // Metadata signal is independent of the image bytes
        let metadata = metadata_labels(photo);
        merge_labels(&mut photo.scene_labels, metadata);

        match image {
            Some(bytes) => match self.model.classify(bytes) {
                Ok(signal) => {
                    merge_labels(&mut photo.scene_labels, signal.labels);
                    if photo.perceptual_hash.is_none() {
                        photo.perceptual_hash = signal.perceptual_hash;
                    }
                }
                Err(e) => {
                    debug!(
                        record_id = %record.record_id,
                        model = self.model.name(),
                        error = %e,
                        "Content classification failed"
                    );
                    record
                        .diagnostics
                        .push(Diagnostic::classification_failure(e.to_string()));
                }
            },
            None => {
                record
                    .diagnostics
                    .push(Diagnostic::classification_failure(
                        "image bytes unavailable in container",
                    ));
            }
        }
    }
}

/// Cheap signals derivable from the record alone.
fn metadata_labels(photo: &PhotoRecord) -> Vec<SceneLabel> {
    let mut labels = Vec::new();

    if let Some(name) = &photo.file_name {
        if name.to_ascii_lowercase().ends_with(".png") {
            // Camera rolls store captures as JPEG/HEIC; PNG almost
            // always means a screen capture
            labels.push(SceneLabel::new("screenshot", 0.4));
        }
    }
    if photo.location.is_some() {
        labels.push(SceneLabel::new("outdoor_scene", 0.3));
    }

    labels
}

/// Union two label sets, keeping the higher confidence where both name
/// the same label. Result is sorted by label name for determinism.
pub fn merge_labels(into: &mut Vec<SceneLabel>, additional: Vec<SceneLabel>) {
    for label in additional {
        match into.iter_mut().find(|l| l.label == label.label) {
            Some(existing) => {
                if label.confidence > existing.confidence {
                    existing.confidence = label.confidence;
                }
            }
            None => into.push(label),
        }
    }
    into.sort_by(|a, b| a.label.cmp(&b.label));
}
