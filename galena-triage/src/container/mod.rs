//! Container readers: one addressing scheme over every supported backup
//! topology.
//!
//! A backup arrives as one of three shapes — an iOS hashed-blob store, a
//! nested directory tree (Android extraction), or a ZIP of either — and
//! the rest of the pipeline never finds out which. Readers expose the
//! sources present for each artifact family, stage requested blobs to
//! readable local paths, and fetch media bytes by container-relative
//! address. They normalize topology only; artifact semantics live in the
//! format adapters.

pub mod archive;
pub mod ios;
pub mod tree;

use galena_common::records::{ArtifactKind, DeviceProfile, Platform};
use galena_common::ContainerError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts for transient container I/O before escalating to
/// `ContainerError` (backup contents are static; nothing else retries).
const IO_RETRY_ATTEMPTS: u32 = 3;

/// One addressable artifact source inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub kind: ArtifactKind,
    /// Container-relative logical path (e.g. `HomeDomain-Library/SMS/sms.db`)
    pub logical_path: String,
    /// Short human label ("sms.db")
    pub display_name: String,
}

impl SourceDescriptor {
    pub fn new(kind: ArtifactKind, logical_path: impl Into<String>) -> Self {
        let logical_path = logical_path.into();
        let display_name = logical_path
            .rsplit('/')
            .next()
            .unwrap_or(&logical_path)
            .to_string();
        Self {
            kind,
            logical_path,
            display_name,
        }
    }
}

/// A source staged to a local path an adapter can open directly.
#[derive(Debug, Clone)]
pub struct StagedSource {
    pub descriptor: SourceDescriptor,
    pub path: PathBuf,
}

/// Uniform view over a backup container.
///
/// Read-only by contract: no implementation ever writes into the source
/// container; staging copies into a run-scoped temp directory.
pub trait BackupContainer: Send + Sync + std::fmt::Debug {
    fn platform(&self) -> Platform;

    /// Device identity, to the extent the container records it.
    fn device_profile(&self) -> DeviceProfile;

    /// Sources present for the family. A partially-present container
    /// simply yields fewer descriptors; absence is never fatal here.
    fn sources_for(&self, kind: ArtifactKind) -> Vec<SourceDescriptor>;

    /// Expected sources for the family whether or not they are present,
    /// so the pipeline can report what a complete container would have
    /// held.
    fn expected_sources(&self, kind: ArtifactKind) -> Vec<SourceDescriptor>;

    /// Stage a source to a readable local path.
    fn stage(&self, descriptor: &SourceDescriptor) -> Result<StagedSource, ContainerError>;

    /// Fetch media bytes by container-relative address (photo blobs).
    fn read_media(&self, address: &str) -> Result<Vec<u8>, ContainerError>;
}

/// Open a backup container, sniffing its topology.
pub fn open_container(path: &Path) -> Result<Arc<dyn BackupContainer>, ContainerError> {
    if !path.exists() {
        return Err(ContainerError::Unreadable(format!(
            "no such path: {}",
            path.display()
        )));
    }

    if path.is_file() {
        debug!(path = %path.display(), "Opening single-file archive container");
        return Ok(Arc::new(archive::ArchiveContainer::open(path)?));
    }

    if ios::looks_like_ios_backup(path) {
        debug!(path = %path.display(), "Opening iOS hashed-blob container");
        return Ok(Arc::new(ios::IosBackup::open(path)?));
    }

    debug!(path = %path.display(), "Opening directory-tree container");
    Ok(Arc::new(tree::TreeContainer::open(path)?))
}

/// Run an I/O closure with bounded retry for transient failures
/// (locked file, interrupted read). Non-transient errors escalate on
/// first sight.
pub(crate) fn with_io_retry<T>(
    what: &str,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> Result<T, ContainerError> {
    let mut last_err = None;
    for attempt in 1..=IO_RETRY_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                warn!(what, attempt, error = %e, "Transient container I/O failure, retrying");
                std::thread::sleep(std::time::Duration::from_millis(50 * attempt as u64));
                last_err = Some(e);
            }
            Err(e) => {
                return Err(ContainerError::Unreadable(format!("{what}: {e}")));
            }
        }
    }
    Err(ContainerError::Unreadable(format!(
        "{what}: {} (after {IO_RETRY_ATTEMPTS} attempts)",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_display_name_takes_last_segment() {
        let d = SourceDescriptor::new(ArtifactKind::Messages, "HomeDomain-Library/SMS/sms.db");
        assert_eq!(d.display_name, "sms.db");
    }

    #[test]
    fn open_container_rejects_missing_path() {
        let err = open_container(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ContainerError::Unreadable(_)));
    }

    #[test]
    fn retry_gives_up_on_persistent_transient_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_io_retry("locked file", || {
            calls += 1;
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "locked"))
        });
        assert!(result.is_err());
        assert_eq!(calls, IO_RETRY_ATTEMPTS);
    }

    #[test]
    fn retry_does_not_loop_on_hard_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_io_retry("gone", || {
            calls += 1;
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
