//! Configuration loading for the triage pipeline.
//!
//! Layering follows TOML file → environment → caller overrides, lowest
//! priority first. The pipeline consumes the resolved [`TriageConfig`];
//! it never reads files or environment variables itself.

use crate::error::{Error, Result};
use crate::records::ArtifactKind;
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "GALENA_";

/// Resolved configuration consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Artifact families to extract
    pub kinds: Vec<ArtifactKind>,
    /// Explicit device-timezone override; None means no timezone
    /// evidence and UTC rendering with unavailable confidence
    pub device_offset: Option<FixedOffset>,
    /// Whether implausible-timestamp records appear in listings
    /// (default true: flagged, never hidden)
    pub include_implausible: bool,
    /// Classifier worker count; None sizes to available cores
    pub classifier_workers: Option<usize>,
    /// Bounded queue depth between adapters and the classifier
    pub classify_queue_depth: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            kinds: ArtifactKind::ALL.to_vec(),
            device_offset: None,
            include_implausible: true,
            classifier_workers: None,
            classify_queue_depth: 64,
        }
    }
}

/// On-disk TOML shape (all fields optional).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub kinds: Option<Vec<String>>,
    pub device_timezone: Option<String>,
    pub include_implausible: Option<bool>,
    pub classifier_workers: Option<usize>,
    pub classify_queue_depth: Option<usize>,
}

/// Default configuration file path for the platform.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("galena").join("galena.toml"))
}

/// Load and layer configuration: defaults ← TOML ← environment.
///
/// A missing file is not an error; a present-but-invalid file is.
pub fn load(config_path: Option<&Path>) -> Result<TriageConfig> {
    let mut config = TriageConfig::default();

    let path = config_path
        .map(PathBuf::from)
        .or_else(default_config_path);
    if let Some(path) = path {
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
            let toml_config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
            apply_toml(&mut config, &toml_config)?;
            tracing::info!(path = %path.display(), "Loaded configuration file");
        }
    }

    apply_env(&mut config)?;
    Ok(config)
}

fn apply_toml(config: &mut TriageConfig, toml_config: &TomlConfig) -> Result<()> {
    if let Some(kinds) = &toml_config.kinds {
        config.kinds = parse_kinds_list(kinds)?;
    }
    if let Some(tz) = &toml_config.device_timezone {
        config.device_offset = Some(parse_utc_offset(tz)?);
    }
    if let Some(v) = toml_config.include_implausible {
        config.include_implausible = v;
    }
    if toml_config.classifier_workers.is_some() {
        config.classifier_workers = toml_config.classifier_workers;
    }
    if let Some(v) = toml_config.classify_queue_depth {
        config.classify_queue_depth = v;
    }
    Ok(())
}

fn apply_env(config: &mut TriageConfig) -> Result<()> {
    if let Ok(kinds) = std::env::var(format!("{ENV_PREFIX}KINDS")) {
        let list: Vec<String> = kinds.split(',').map(|s| s.to_string()).collect();
        config.kinds = parse_kinds_list(&list)?;
    }
    if let Ok(tz) = std::env::var(format!("{ENV_PREFIX}TIMEZONE")) {
        config.device_offset = Some(parse_utc_offset(&tz)?);
    }
    if let Ok(v) = std::env::var(format!("{ENV_PREFIX}INCLUDE_IMPLAUSIBLE")) {
        config.include_implausible = matches!(v.as_str(), "1" | "true" | "yes");
    }
    Ok(())
}

/// Parse a comma-separated or TOML-array artifact kind list.
pub fn parse_kinds_list(kinds: &[String]) -> Result<Vec<ArtifactKind>> {
    let mut parsed = Vec::new();
    for name in kinds {
        let kind = ArtifactKind::parse(name)
            .ok_or_else(|| Error::Config(format!("unknown artifact kind: {name}")))?;
        if !parsed.contains(&kind) {
            parsed.push(kind);
        }
    }
    if parsed.is_empty() {
        return Err(Error::Config("artifact kind list is empty".to_string()));
    }
    Ok(parsed)
}

/// Parse a device-timezone override: "UTC", "+05:30", "-0800", "+02".
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return Ok(FixedOffset::east_opt(0).expect("zero offset"));
    }

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1i32, &s[1..]),
        Some(b'-') => (-1i32, &s[1..]),
        _ => {
            return Err(Error::Config(format!(
                "timezone offset must start with '+' or '-': {s}"
            )))
        }
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>(), Ok(0)),
        4 => (digits[..2].parse::<i32>(), digits[2..].parse::<i32>()),
        _ => {
            return Err(Error::Config(format!("unrecognized offset format: {s}")));
        }
    };
    let (hours, minutes) = (
        hours.map_err(|e| Error::Config(format!("offset hours: {e}")))?,
        minutes.map_err(|e| Error::Config(format!("offset minutes: {e}")))?,
    );

    if hours > 14 || minutes > 59 {
        return Err(Error::Config(format!("offset out of range: {s}")));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| Error::Config(format!("offset out of range: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_extract_everything_flagged_included() {
        let config = TriageConfig::default();
        assert_eq!(config.kinds.len(), ArtifactKind::ALL.len());
        assert!(config.include_implausible);
    }

    #[test]
    fn parses_offset_formats() {
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(
            parse_utc_offset("+05:30").unwrap().local_minus_utc(),
            5 * 3600 + 30 * 60
        );
        assert_eq!(parse_utc_offset("-0800").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_utc_offset("+02").unwrap().local_minus_utc(), 2 * 3600);
        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+99:00").is_err());
    }

    #[test]
    fn toml_layer_applies_over_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            kinds = ["messages", "calls"]
            device_timezone = "-0500"
            include_implausible = false
            "#,
        )
        .unwrap();
        let mut config = TriageConfig::default();
        apply_toml(&mut config, &toml_config).unwrap();
        assert_eq!(
            config.kinds,
            vec![ArtifactKind::Messages, ArtifactKind::Calls]
        );
        assert_eq!(config.device_offset.unwrap().local_minus_utc(), -5 * 3600);
        assert!(!config.include_implausible);
    }

    #[test]
    fn unknown_kind_is_a_config_error() {
        let err = parse_kinds_list(&["voicemail".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_an_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galena.toml");
        std::fs::write(&path, "kinds = [\"photos\"]\ndevice_timezone = \"+01:00\"\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.kinds, vec![ArtifactKind::Photos]);
        assert_eq!(config.device_offset.unwrap().local_minus_utc(), 3600);
    }

    #[test]
    fn load_tolerates_a_missing_file() {
        let config = load(Some(Path::new("/no/such/galena.toml"))).unwrap();
        assert_eq!(config.kinds.len(), ArtifactKind::ALL.len());
    }
}
