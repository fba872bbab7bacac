//! iOS backup container: a flat store of blobs named by
//! SHA-1(`domain-relativePath`), plus Info.plist / Manifest.plist at the
//! root.
//!
//! The hash addressing means no Manifest.db lookup is needed for the
//! artifact databases this pipeline understands: their domain-relative
//! paths are stable across iOS versions and the blob name is computable.
//! Camera-roll media resolves the same way
//! (`CameraRollDomain-Media/<relative path>`).

use super::{with_io_retry, BackupContainer, SourceDescriptor, StagedSource};
use galena_common::records::{ArtifactKind, DeviceProfile, Platform};
use galena_common::ContainerError;
use once_cell::sync::Lazy;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Well-known artifact database locations, by family.
///
/// These are the same domain-relative paths the device writes; they have
/// been stable since iOS 5 and are the basis of the blob naming scheme.
pub(crate) const WELL_KNOWN_SOURCES: &[(ArtifactKind, &str)] = &[
    (ArtifactKind::Contacts, "HomeDomain-Library/AddressBook/AddressBook.sqlitedb"),
    (ArtifactKind::Messages, "HomeDomain-Library/SMS/sms.db"),
    (ArtifactKind::Calls, "HomeDomain-Library/CallHistoryDB/CallHistory.storedata"),
    (ArtifactKind::Permissions, "HomeDomain-Library/TCC/TCC.db"),
    (ArtifactKind::WebHistory, "AppDomain-com.apple.mobilesafari-Library/Safari/History.db"),
    (ArtifactKind::Photos, "CameraRollDomain-Media/PhotoData/Photos.sqlite"),
    (ArtifactKind::Accounts, "HomeDomain-Library/Accounts/Accounts3.sqlite"),
];

/// Logical path used for the app inventory source (a root-level plist,
/// not a hashed blob).
pub const INFO_PLIST_SOURCE: &str = "Info.plist";

/// Friendly names for Apple product type identifiers. Unknown types fall
/// back to the raw identifier.
static MODEL_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("iPhone8,1", "iPhone 6s"),
        ("iPhone8,2", "iPhone 6s Plus"),
        ("iPhone8,4", "iPhone SE (1st generation)"),
        ("iPhone9,1", "iPhone 7"),
        ("iPhone9,2", "iPhone 7 Plus"),
        ("iPhone10,1", "iPhone 8"),
        ("iPhone10,2", "iPhone 8 Plus"),
        ("iPhone10,3", "iPhone X"),
        ("iPhone10,6", "iPhone X"),
        ("iPhone11,2", "iPhone XS"),
        ("iPhone11,6", "iPhone XS Max"),
        ("iPhone11,8", "iPhone XR"),
        ("iPhone12,1", "iPhone 11"),
        ("iPhone12,3", "iPhone 11 Pro"),
        ("iPhone12,5", "iPhone 11 Pro Max"),
        ("iPhone12,8", "iPhone SE (2nd generation)"),
        ("iPhone13,1", "iPhone 12 mini"),
        ("iPhone13,2", "iPhone 12"),
        ("iPhone13,3", "iPhone 12 Pro"),
        ("iPhone13,4", "iPhone 12 Pro Max"),
        ("iPhone14,2", "iPhone 13 Pro"),
        ("iPhone14,3", "iPhone 13 Pro Max"),
        ("iPhone14,4", "iPhone 13 mini"),
        ("iPhone14,5", "iPhone 13"),
        ("iPhone14,6", "iPhone SE (3rd generation)"),
        ("iPhone14,7", "iPhone 14"),
        ("iPhone14,8", "iPhone 14 Plus"),
        ("iPhone15,2", "iPhone 14 Pro"),
        ("iPhone15,3", "iPhone 14 Pro Max"),
        ("iPhone15,4", "iPhone 15"),
        ("iPhone15,5", "iPhone 15 Plus"),
        ("iPhone16,1", "iPhone 15 Pro"),
        ("iPhone16,2", "iPhone 15 Pro Max"),
        ("iPad7,11", "iPad (7th generation)"),
        ("iPad11,6", "iPad (8th generation)"),
        ("iPad12,1", "iPad (9th generation)"),
        ("iPad13,18", "iPad (10th generation)"),
    ])
});

/// Quick topology sniff used by the container dispatcher.
pub fn looks_like_ios_backup(dir: &Path) -> bool {
    dir.join("Manifest.db").exists()
        || dir.join("Manifest.plist").exists()
        || dir.join(INFO_PLIST_SOURCE).exists()
}

/// An opened iOS hashed-blob backup.
#[derive(Debug)]
pub struct IosBackup {
    root: PathBuf,
    profile: DeviceProfile,
    staging: TempDir,
}

impl IosBackup {
    /// Open a backup directory.
    ///
    /// Fails with `Unsupported` when the backup is still encrypted (the
    /// pipeline requires a decrypted container; pretending an encrypted
    /// store is empty would mislead the investigator) and `Truncated`
    /// when the root plists are present but unreadable.
    pub fn open(root: &Path) -> Result<Self, ContainerError> {
        let manifest_plist = root.join("Manifest.plist");
        if manifest_plist.exists() {
            let manifest = plist::Value::from_file(&manifest_plist).map_err(|e| {
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
        }

        let profile = read_device_profile(root);
        info!(
            device = profile.device_name.as_deref().unwrap_or("unknown"),
            model = profile.model.as_deref().unwrap_or("unknown"),
            os_version = profile.os_version.as_deref().unwrap_or("unknown"),
            "Opened iOS backup"
        );

        let staging = TempDir::new().map_err(|e| {
            ContainerError::Unreadable(format!("cannot create staging directory: {e}"))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            profile,
            staging,
        })
    }

    /// On-disk blob path for a logical `domain-relativePath` address.
    /// iOS 10+ shards blobs into two-hex-digit subdirectories; older
    /// backups keep them flat. Both layouts are probed.
    fn blob_path(&self, logical_path: &str) -> Option<PathBuf> {
        let file_id = file_id_for(logical_path);
        let sharded = self.root.join(&file_id[..2]).join(&file_id);
        if sharded.exists() {
            return Some(sharded);
        }
        let flat = self.root.join(&file_id);
        if flat.exists() {
            return Some(flat);
        }
        None
    }
}

/// Blob name for a logical address: hex SHA-1 of the
/// `domain-relativePath` string. This is the device's own scheme, not a
/// pipeline invention.
pub fn file_id_for(logical_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(logical_path.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn read_device_profile(root: &Path) -> DeviceProfile {
    let mut profile = DeviceProfile {
        platform: Some(Platform::Ios),
        ..Default::default()
    };

    let info_path = root.join(INFO_PLIST_SOURCE);
    let info = match plist::Value::from_file(&info_path) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Info.plist missing or unreadable; device profile left empty");
            return profile;
        }
    };
    let Some(dict) = info.as_dictionary() else {
        return profile;
    };

    let get = |key: &str| dict.get(key).and_then(|v| v.as_string()).map(String::from);

    profile.device_name = get("Device Name");
    profile.phone_number = get("Phone Number");
    profile.imei = get("IMEI");
    profile.serial_number = get("Serial Number");
    profile.os_version = get("Product Version");
    profile.model = get("Product Type").map(|product_type| {
        MODEL_NAMES
            .get(product_type.as_str())
            .map(|name| name.to_string())
            .unwrap_or(product_type)
    });

    profile
}

impl BackupContainer for IosBackup {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    fn device_profile(&self) -> DeviceProfile {
        self.profile.clone()
    }

    fn sources_for(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        self.expected_sources(kind)
            .into_iter()
            .filter(|descriptor| {
                if descriptor.logical_path == INFO_PLIST_SOURCE {
                    self.root.join(INFO_PLIST_SOURCE).exists()
                } else {
                    self.blob_path(&descriptor.logical_path).is_some()
                }
            })
            .collect()
    }

    fn expected_sources(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        if kind == ArtifactKind::Apps {
            return vec![SourceDescriptor::new(kind, INFO_PLIST_SOURCE)];
        }
        WELL_KNOWN_SOURCES
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(k, path)| SourceDescriptor::new(*k, *path))
            .collect()
    }

    fn stage(&self, descriptor: &SourceDescriptor) -> Result<StagedSource, ContainerError> {
        // Root-level plists are readable in place
        if descriptor.logical_path == INFO_PLIST_SOURCE {
            return Ok(StagedSource {
                descriptor: descriptor.clone(),
                path: self.root.join(INFO_PLIST_SOURCE),
            });
        }

        let blob = self.blob_path(&descriptor.logical_path).ok_or_else(|| {
            ContainerError::Unreadable(format!("blob missing for {}", descriptor.logical_path))
        })?;

        // Stage under a name unique per source; sibling WAL/SHM files do
        // not exist in backups, so a plain copy is complete
        let file_id = file_id_for(&descriptor.logical_path);
        let staged_path = self
            .staging
            .path()
            .join(format!("{}-{}", &file_id[..8], descriptor.display_name));

        with_io_retry(&format!("stage {}", descriptor.display_name), || {
            std::fs::copy(&blob, &staged_path).map(|_| ())
        })?;
        debug!(
            source = %descriptor.logical_path,
            staged = %staged_path.display(),
            "Staged iOS source"
        );

        Ok(StagedSource {
            descriptor: descriptor.clone(),
            path: staged_path,
        })
    }

    fn read_media(&self, address: &str) -> Result<Vec<u8>, ContainerError> {
        let blob = self.blob_path(address).ok_or_else(|| {
            ContainerError::Unreadable(format!("media blob missing for {address}"))
        })?;
        with_io_retry(&format!("read media {address}"), || std::fs::read(&blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_matches_device_scheme() {
        // Known blob names for the standard artifact databases
        assert_eq!(
            file_id_for("HomeDomain-Library/SMS/sms.db"),
            "3d0d7e5fb2ce288813306e4d4636395e047a3d28"
        );
        assert_eq!(
            file_id_for("HomeDomain-Library/AddressBook/AddressBook.sqlitedb"),
            "31bb7ba8914766d4ba40d6dfb6113c8b614be442"
        );
        assert_eq!(
            file_id_for("CameraRollDomain-Media/PhotoData/Photos.sqlite"),
            "12b144c0bd44f2b3dffd9186d3f9c05b917cee25"
        );
    }

    #[test]
    fn encrypted_backup_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(true));
        plist::Value::Dictionary(manifest)
            .to_file_xml(dir.path().join("Manifest.plist"))
            .unwrap();

        let err = IosBackup::open(dir.path()).unwrap_err();
        assert!(matches!(err, ContainerError::Unsupported(_)));
    }

    #[test]
    fn missing_sources_are_omitted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(false));
        plist::Value::Dictionary(manifest)
            .to_file_xml(dir.path().join("Manifest.plist"))
            .unwrap();

        let backup = IosBackup::open(dir.path()).unwrap();
        assert!(backup.sources_for(ArtifactKind::Messages).is_empty());
        assert_eq!(backup.expected_sources(ArtifactKind::Messages).len(), 1);
    }

    #[test]
    fn sharded_and_flat_blob_layouts_are_probed() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(false));
        plist::Value::Dictionary(manifest)
            .to_file_xml(dir.path().join("Manifest.plist"))
            .unwrap();

        let file_id = file_id_for("HomeDomain-Library/SMS/sms.db");
        std::fs::create_dir_all(dir.path().join(&file_id[..2])).unwrap();
        std::fs::write(dir.path().join(&file_id[..2]).join(&file_id), b"x").unwrap();

        let backup = IosBackup::open(dir.path()).unwrap();
        assert_eq!(backup.sources_for(ArtifactKind::Messages).len(), 1);
    }
}
