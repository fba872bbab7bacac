//! Directory-tree container: an Android file-system extraction (or any
//! unpacked backup laid out as real paths).
//!
//! Android artifact databases live at well-known content-provider paths
//! under `data/data/`; system state (package inventory, runtime
//! permissions) lives under `data/system/`. Extractions differ in how
//! much of the tree they captured, so every family lists several
//! candidate paths and only the ones present become sources.

use super::{with_io_retry, BackupContainer, SourceDescriptor, StagedSource};
use galena_common::records::{ArtifactKind, DeviceProfile, Platform};
use galena_common::ContainerError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Candidate source paths per family, tried in order. Multiple hits all
/// become sources (e.g. Chrome and a vendor browser both present).
pub(crate) const CANDIDATE_SOURCES: &[(ArtifactKind, &str)] = &[
    (
        ArtifactKind::Contacts,
        "data/data/com.android.providers.contacts/databases/contacts2.db",
    ),
    (
        ArtifactKind::Messages,
        "data/data/com.android.providers.telephony/databases/mmssms.db",
    ),
    (
        ArtifactKind::Calls,
        "data/data/com.android.providers.contacts/databases/calllog.db",
    ),
    (
        ArtifactKind::Calls,
        "data/data/com.android.calllogbackup/databases/calllog.db",
    ),
    (ArtifactKind::Apps, "data/system/packages.xml"),
    (
        ArtifactKind::Permissions,
        "data/system/users/0/runtime-permissions.xml",
    ),
    (
        ArtifactKind::WebHistory,
        "data/data/com.android.chrome/app_chrome/Default/History",
    ),
    (
        ArtifactKind::WebHistory,
        "data/data/com.sec.android.app.sbrowser/app_sbrowser/Default/History",
    ),
    (
        ArtifactKind::Photos,
        "data/data/com.android.providers.media/databases/external.db",
    ),
];

/// An opened directory-tree container.
#[derive(Debug)]
pub struct TreeContainer {
    root: PathBuf,
    profile: DeviceProfile,
}

impl TreeContainer {
    pub fn open(root: &Path) -> Result<Self, ContainerError> {
        let readable = with_io_retry("read container directory", || std::fs::read_dir(root))?;
        // A completely empty directory is more likely a wrong path than
        // a backup with nothing in it
        if readable.take(1).count() == 0 {
            return Err(ContainerError::Truncated(format!(
                "directory is empty: {}",
                root.display()
            )));
        }

        let profile = read_device_profile(root);
        info!(
            model = profile.model.as_deref().unwrap_or("unknown"),
            os_version = profile.os_version.as_deref().unwrap_or("unknown"),
            "Opened directory-tree container"
        );

        Ok(Self {
            root: root.to_path_buf(),
            profile,
        })
    }

    /// Last-resort media lookup: walk the tree for a matching file
    /// name, smallest path first for determinism.
    fn find_by_file_name(&self, relative: &str) -> Option<std::path::PathBuf> {
        let wanted = Path::new(relative).file_name()?;
        walkdir::WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_type().is_file() && entry.file_name() == wanted)
            .map(|entry| entry.into_path())
    }
}

/// Pull device identity out of `build.prop`, when the extraction
/// captured it.
fn read_device_profile(root: &Path) -> DeviceProfile {
    let mut profile = DeviceProfile {
        platform: Some(Platform::Android),
        ..Default::default()
    };

    for candidate in ["system/build.prop", "build.prop"] {
        let Ok(content) = std::fs::read_to_string(root.join(candidate)) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("ro.build.version.release=") {
                profile.os_version = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("ro.product.model=") {
                profile.model = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("ro.product.name=") {
                if profile.device_name.is_none() {
                    profile.device_name = Some(value.to_string());
                }
            }
        }
        break;
    }

    profile
}

impl BackupContainer for TreeContainer {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn device_profile(&self) -> DeviceProfile {
        self.profile.clone()
    }

    fn sources_for(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        self.expected_sources(kind)
            .into_iter()
            .filter(|descriptor| self.root.join(&descriptor.logical_path).exists())
            .collect()
    }

    fn expected_sources(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        CANDIDATE_SOURCES
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(k, path)| SourceDescriptor::new(*k, *path))
            .collect()
    }

    fn stage(&self, descriptor: &SourceDescriptor) -> Result<StagedSource, ContainerError> {
        // Real paths are readable in place; adapters open read-only
        let path = self.root.join(&descriptor.logical_path);
        if !path.exists() {
            return Err(ContainerError::Unreadable(format!(
                "source missing: {}",
                descriptor.logical_path
            )));
        }
        debug!(source = %descriptor.logical_path, "Using in-place tree source");
        Ok(StagedSource {
            descriptor: descriptor.clone(),
            path,
        })
    }

    fn read_media(&self, address: &str) -> Result<Vec<u8>, ContainerError> {
        // MediaProvider records absolute device paths; extractions mirror
        // them as relative trees
        let relative = address.trim_start_matches('/');
        let candidates = [
            self.root.join(relative),
            self.root.join("storage/emulated/0").join(relative),
            self.root.join("sdcard").join(relative),
        ];
        for candidate in &candidates {
            if candidate.exists() {
                return with_io_retry(&format!("read media {address}"), || {
                    std::fs::read(candidate)
                });
            }
        }

        // Extractions frequently relocate media directories; fall back
        // to a file-name search before reporting the blob gone
        if let Some(found) = self.find_by_file_name(relative) {
            return with_io_retry(&format!("read media {address}"), || std::fs::read(&found));
        }

        Err(ContainerError::Unreadable(format!(
            "media not present in extraction: {address}"
        )))
    }
}
