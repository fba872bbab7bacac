//! Default content model: decode-and-measure heuristics.
//!
//! No external inference runtime; labels come from cheap image
//! statistics. Real deployments can swap a heavier model in behind
//! [`super::ContentModel`] without touching the pipeline.

use super::{ClassifyError, ContentModel, ContentSignal};
use galena_common::records::SceneLabel;
use image::imageops::FilterType;
use image::GenericImageView;
use image_hasher::{HashAlg, HasherConfig};

/// Native portrait resolutions of common handsets; an exact match is a
/// strong screenshot signal.
const SCREEN_RESOLUTIONS: &[(u32, u32)] = &[
    (640, 1136),
    (750, 1334),
    (828, 1792),
    (1080, 1920),
    (1080, 2340),
    (1080, 2400),
    (1125, 2436),
    (1170, 2532),
    (1179, 2556),
    (1242, 2208),
    (1242, 2688),
    (1284, 2778),
    (1290, 2796),
    (1440, 2560),
    (1440, 3200),
];

#[derive(Default)]
pub struct HeuristicContentModel;

impl ContentModel for HeuristicContentModel {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify(&self, image_bytes: &[u8]) -> Result<ContentSignal, ClassifyError> {
        // Sniff before decode so an unsupported codec reads as such
        // rather than a generic decode failure
        let sniffed = infer::get(image_bytes);
        let is_image = sniffed.map(|t| t.matcher_type() == infer::MatcherType::Image);
        match is_image {
            Some(true) => {}
            Some(false) => {
                return Err(ClassifyError::UnsupportedCodec(
                    sniffed.map(|t| t.mime_type().to_string()).unwrap_or_default(),
                ))
            }
            None => {
                return Err(ClassifyError::Undecodable(
                    "unrecognized image bytes".to_string(),
                ))
            }
        }

        let img = image::load_from_memory(image_bytes)
            .map_err(|e| ClassifyError::Undecodable(e.to_string()))?;

        let mut labels = Vec::new();

        let (width, height) = img.dimensions();
        let is_png = sniffed.map(|t| t.mime_type() == "image/png").unwrap_or(false);
        if matches_screen_resolution(width, height) {
            labels.push(SceneLabel::new("screenshot", 0.8));
        } else if is_png && is_screen_shaped(width, height) {
            labels.push(SceneLabel::new("screenshot", 0.55));
        }

        let stats = sample_stats(&img);
        // Bright, near-monochrome frames read as paperwork
        if stats.mean_luma > 0.75 && stats.colorfulness < 0.08 {
            labels.push(SceneLabel::new("document", 0.6));
        }

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::DoubleGradient)
            .hash_size(8, 8)
            .to_hasher();
        let perceptual_hash = Some(hasher.hash_image(&img).to_base64());

        Ok(ContentSignal {
            labels,
            perceptual_hash,
        })
    }
}

fn matches_screen_resolution(width: u32, height: u32) -> bool {
    SCREEN_RESOLUTIONS
        .iter()
        .any(|&(w, h)| (width, height) == (w, h) || (width, height) == (h, w))
}

/// Tall (or wide) in the range modern handset screens occupy.
fn is_screen_shaped(width: u32, height: u32) -> bool {
    let (short, long) = if width < height {
        (width, height)
    } else {
        (height, width)
    };
    if short == 0 {
        return false;
    }
    let ratio = long as f64 / short as f64;
    (1.7..=2.3).contains(&ratio)
}

struct SampleStats {
    mean_luma: f64,
    colorfulness: f64,
}

/// Downsample and measure; 64x64 keeps the pass cheap and deterministic
/// regardless of source size.
fn sample_stats(img: &image::DynamicImage) -> SampleStats {
    let small = img.resize_exact(64, 64, FilterType::Triangle).to_rgb8();
    let mut luma_sum = 0.0f64;
    let mut color_sum = 0.0f64;
    let pixels = (small.width() * small.height()) as f64;

    for pixel in small.pixels() {
        let [r, g, b] = pixel.0;
        let (r, g, b) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
        luma_sum += 0.299 * r + 0.587 * g + 0.114 * b;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        color_sum += max - min;
    }

    SampleStats {
        mean_luma: luma_sum / pixels,
        colorfulness: color_sum / pixels,
    }
}
