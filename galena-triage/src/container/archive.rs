//! Single-file archive container: a ZIP wrapping either an iOS
//! hashed-blob store or an Android-style directory tree.
//!
//! Entries are normalized to the same addressing scheme the unpacked
//! containers use; staging extracts single entries into the run's temp
//! directory, never the whole archive.

use super::{ios, tree, BackupContainer, SourceDescriptor, StagedSource};
use galena_common::records::{ArtifactKind, DeviceProfile, Platform};
use galena_common::ContainerError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

/// Which topology the archive wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerLayout {
    IosBlobStore,
    DirectoryTree,
}

pub struct ArchiveContainer {
    archive: Mutex<ZipArchive<File>>,
    /// Full entry name → entry index
    entries: HashMap<String, usize>,
    /// Shared leading directory inside the archive ("" or "backup/")
    prefix: String,
    layout: InnerLayout,
    profile: DeviceProfile,
    staging: TempDir,
}

impl std::fmt::Debug for ArchiveContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveContainer")
            .field("entries", &self.entries.len())
            .field("prefix", &self.prefix)
            .field("layout", &self.layout)
            .field("profile", &self.profile)
            .finish()
    }
}

impl ArchiveContainer {
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        let file = super::with_io_retry("open archive", || File::open(path))?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            ContainerError::Unsupported(format!("not a readable ZIP archive: {e}"))
        })?;
        if archive.len() == 0 {
            return Err(ContainerError::Truncated("archive has no entries".to_string()));
        }

        let mut entries = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(|e| {
                ContainerError::Truncated(format!("archive entry {index} unreadable: {e}"))
            })?;
            if !entry.is_dir() {
                entries.insert(entry.name().to_string(), index);
            }
        }

        let prefix = shared_prefix(entries.keys());
        let has_root_file = |name: &str| {
            entries.contains_key(name) || entries.contains_key(&format!("{prefix}{name}"))
        };
        let layout = if has_root_file("Manifest.plist")
            || has_root_file("Manifest.db")
            || has_root_file("Info.plist")
        {
            InnerLayout::IosBlobStore
        } else {
            InnerLayout::DirectoryTree
        };

        let staging = TempDir::new().map_err(|e| {
            ContainerError::Unreadable(format!("cannot create staging directory: {e}"))
        })?;

        let mut container = Self {
            archive: Mutex::new(archive),
            entries,
            prefix,
            layout,
            profile: DeviceProfile::default(),
            staging,
        };

        container.check_encryption()?;
        container.profile = container.read_device_profile();
        info!(
            layout = ?container.layout,
            entries = container.entries.len(),
            "Opened archive container"
        );

        Ok(container)
    }

    fn check_encryption(&self) -> Result<(), ContainerError> {
        if self.layout != InnerLayout::IosBlobStore {
            return Ok(());
        }
        let Some(bytes) = self
            .locate("Manifest.plist")
            .and_then(|name| self.read_entry(&name))
        else {
            return Ok(());
        };
        let manifest = plist::Value::from_reader(Cursor::new(bytes)).map_err(|e| {
            ContainerError::Truncated(format!("Manifest.plist unreadable: {e}"))
        })?;
        let encrypted = manifest
            .as_dictionary()
            .and_then(|d| d.get("IsEncrypted"))
            .and_then(|v| v.as_boolean())
            .unwrap_or(false);
        if encrypted {
            return Err(ContainerError::Unsupported(
                "backup is encrypted; supply a decrypted container".to_string(),
            ));
        }
        Ok(())
    }

    fn read_device_profile(&self) -> DeviceProfile {
        match self.layout {
            InnerLayout::IosBlobStore => {
                let mut profile = DeviceProfile {
                    platform: Some(Platform::Ios),
                    ..Default::default()
                };
                let Some(bytes) = self
                    .locate("Info.plist")
                    .and_then(|name| self.read_entry(&name))
                else {
                    return profile;
                };
                let Ok(info) = plist::Value::from_reader(Cursor::new(bytes)) else {
                    return profile;
                };
                if let Some(dict) = info.as_dictionary() {
                    let get = |key: &str| {
                        dict.get(key).and_then(|v| v.as_string()).map(String::from)
                    };
                    profile.device_name = get("Device Name");
                    profile.phone_number = get("Phone Number");
                    profile.imei = get("IMEI");
                    profile.serial_number = get("Serial Number");
                    profile.os_version = get("Product Version");
                    profile.model = get("Product Type");
                }
                profile
            }
            InnerLayout::DirectoryTree => {
                let mut profile = DeviceProfile {
                    platform: Some(Platform::Android),
                    ..Default::default()
                };
                let bytes = self
                    .locate("system/build.prop")
                    .or_else(|| self.locate("build.prop"))
                    .and_then(|name| self.read_entry(&name));
                if let Some(bytes) = bytes {
                    let content = String::from_utf8_lossy(&bytes).into_owned();
                    for line in content.lines() {
                        if let Some(v) = line.trim().strip_prefix("ro.build.version.release=") {
                            profile.os_version = Some(v.to_string());
                        } else if let Some(v) = line.trim().strip_prefix("ro.product.model=") {
                            profile.model = Some(v.to_string());
                        }
                    }
                }
                profile
            }
        }
    }

    /// Resolve a container-relative name to a real entry name, looking
    /// through the shared wrapper directory when one exists. A bare
    /// `data/...` tree and a `backup/data/...` tree both resolve.
    fn locate(&self, relative: &str) -> Option<String> {
        if self.entries.contains_key(relative) {
            return Some(relative.to_string());
        }
        if !self.prefix.is_empty() {
            let prefixed = format!("{}{}", self.prefix, relative);
            if self.entries.contains_key(&prefixed) {
                return Some(prefixed);
            }
        }
        None
    }

    /// Read one entry's bytes, if present.
    fn read_entry(&self, name: &str) -> Option<Vec<u8>> {
        let index = *self.entries.get(name)?;
        let mut archive = self.archive.lock().expect("archive lock poisoned");
        let mut entry = archive.by_index(index).ok()?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).ok()?;
        Some(bytes)
    }

    /// Entry name for a logical source address, honoring the layout.
    fn entry_for(&self, logical_path: &str) -> Option<String> {
        match self.layout {
            InnerLayout::IosBlobStore => {
                if logical_path == ios::INFO_PLIST_SOURCE {
                    return self.locate("Info.plist");
                }
                let file_id = ios::file_id_for(logical_path);
                self.locate(&format!("{}/{}", &file_id[..2], file_id))
                    .or_else(|| self.locate(&file_id))
            }
            InnerLayout::DirectoryTree => self.locate(logical_path),
        }
    }
}

/// Shared leading directory across all entry names, or "".
fn shared_prefix<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let mut head: Option<&str> = None;
    for name in names {
        let Some((first, _)) = name.split_once('/') else {
            return String::new();
        };
        match head {
            None => head = Some(first),
            Some(h) if h == first => {}
            Some(_) => return String::new(),
        }
    }
    head.map(|h| format!("{h}/")).unwrap_or_default()
}

impl BackupContainer for ArchiveContainer {
    fn platform(&self) -> Platform {
        match self.layout {
            InnerLayout::IosBlobStore => Platform::Ios,
            InnerLayout::DirectoryTree => Platform::Android,
        }
    }

    fn device_profile(&self) -> DeviceProfile {
        self.profile.clone()
    }

    fn sources_for(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        self.expected_sources(kind)
            .into_iter()
            .filter(|descriptor| self.entry_for(&descriptor.logical_path).is_some())
            .collect()
    }

    fn expected_sources(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        match self.layout {
            InnerLayout::IosBlobStore => {
                if kind == ArtifactKind::Apps {
                    return vec![SourceDescriptor::new(kind, ios::INFO_PLIST_SOURCE)];
                }
                ios::WELL_KNOWN_SOURCES
                    .iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(k, path)| SourceDescriptor::new(*k, *path))
                    .collect()
            }
            InnerLayout::DirectoryTree => tree::CANDIDATE_SOURCES
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(k, path)| SourceDescriptor::new(*k, *path))
                .collect(),
        }
    }

    fn stage(&self, descriptor: &SourceDescriptor) -> Result<StagedSource, ContainerError> {
        let entry = self.entry_for(&descriptor.logical_path).ok_or_else(|| {
            ContainerError::Unreadable(format!("entry missing for {}", descriptor.logical_path))
        })?;
        let bytes = self.read_entry(&entry).ok_or_else(|| {
            ContainerError::Truncated(format!("entry unreadable: {entry}"))
        })?;

        let staged_path = self.staging.path().join(format!(
            "{:08x}-{}",
            self.entries.get(&entry).copied().unwrap_or_default(),
            descriptor.display_name
        ));
        super::with_io_retry(&format!("stage {}", descriptor.display_name), || {
            std::fs::write(&staged_path, &bytes)
        })?;
        debug!(source = %descriptor.logical_path, staged = %staged_path.display(), "Staged archive source");

        Ok(StagedSource {
            descriptor: descriptor.clone(),
            path: staged_path,
        })
    }

    fn read_media(&self, address: &str) -> Result<Vec<u8>, ContainerError> {
        match self.layout {
            InnerLayout::IosBlobStore => {
                let entry = self.entry_for(address).ok_or_else(|| {
                    ContainerError::Unreadable(format!("media entry missing for {address}"))
                })?;
                self.read_entry(&entry).ok_or_else(|| {
                    ContainerError::Truncated(format!("media entry unreadable: {entry}"))
                })
            }
            InnerLayout::DirectoryTree => {
                let relative = address.trim_start_matches('/');
                let candidates = [
                    relative.to_string(),
                    format!("storage/emulated/0/{relative}"),
                    format!("sdcard/{relative}"),
                ];
                for name in &candidates {
                    if let Some(bytes) = self.locate(name).and_then(|n| self.read_entry(&n)) {
                        return Ok(bytes);
                    }
                }
                Err(ContainerError::Unreadable(format!(
                    "media not present in archive: {address}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, bytes) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[test]
    fn tree_zip_exposes_candidate_sources() {
        let file = build_zip(&[(
            "data/data/com.android.providers.telephony/databases/mmssms.db",
            b"db",
        )]);
        let container = ArchiveContainer::open(file.path()).unwrap();
        assert_eq!(container.platform(), Platform::Android);
        assert_eq!(container.sources_for(ArtifactKind::Messages).len(), 1);
        assert!(container.sources_for(ArtifactKind::Calls).is_empty());
    }

    #[test]
    fn prefixed_tree_zip_resolves_through_shared_root() {
        let file = build_zip(&[(
            "extraction/data/data/com.android.providers.telephony/databases/mmssms.db",
            b"db",
        )]);
        let container = ArchiveContainer::open(file.path()).unwrap();
        assert_eq!(container.sources_for(ArtifactKind::Messages).len(), 1);
    }

    #[test]
    fn ios_zip_is_detected_by_root_plists() {
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(false));
        let mut plist_bytes = Vec::new();
        plist::Value::Dictionary(manifest)
            .to_writer_xml(&mut plist_bytes)
            .unwrap();

        let file = build_zip(&[("Manifest.plist", plist_bytes.as_slice())]);
        let container = ArchiveContainer::open(file.path()).unwrap();
        assert_eq!(container.platform(), Platform::Ios);
    }

    #[test]
    fn encrypted_ios_zip_is_rejected() {
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(true));
        let mut plist_bytes = Vec::new();
        plist::Value::Dictionary(manifest)
            .to_writer_xml(&mut plist_bytes)
            .unwrap();

        let file = build_zip(&[("Manifest.plist", plist_bytes.as_slice())]);
        let err = ArchiveContainer::open(file.path()).unwrap_err();
        assert!(matches!(err, ContainerError::Unsupported(_)));
    }
}
