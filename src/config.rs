//! Persisted priority-list configuration.
//!
//! The priority list is stored as a single JSON object
//! `{ "entries": [ { uid, name, transportType, enabled, dependsOn? } ] }`,
//! pretty-printed with sorted keys and written atomically (temp file in the
//! same directory, then rename). Loading is forgiving: any read or parse
//! failure yields the empty default so a damaged file never blocks startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::priority::PriorityEntry;

/// The on-disk configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    /// Priority entries, highest priority first.
    #[serde(default)]
    pub entries: Vec<PriorityEntry>,
}

/// Default config file location (`~/.config/automic/config.json`).
pub fn default_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".config").join("automic").join("config.json")
}

/// Loads the configuration, defaulting to empty on any failure.
pub fn load(path: &Path) -> StoredConfig {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), %error, "config read failed; starting empty");
            }
            return StoredConfig::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "config parse failed; starting empty");
            StoredConfig::default()
        }
    }
}

/// Writes the configuration atomically.
///
/// Serializes through `serde_json::Value` so object keys come out sorted,
/// pretty-prints, writes to a sibling temp file and renames it into place.
///
/// # Errors
///
/// Returns [`ConfigError`] if serialization or any filesystem step fails; a
/// failed write never leaves a partially written config behind.
pub fn save(path: &Path, config: &StoredConfig) -> Result<(), ConfigError> {
    let value = serde_json::to_value(config)?;
    let mut bytes = serde_json::to_vec_pretty(&value)?;
    bytes.push(b'\n');

    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, &bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    tracing::debug!(path = %path.display(), entries = config.entries.len(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TransportKind;
    use tempfile::tempdir;

    fn sample() -> StoredConfig {
        StoredConfig {
            entries: vec![
                PriorityEntry {
                    uid: "uid-a".into(),
                    name: "USB Mic".into(),
                    transport: TransportKind::Usb,
                    enabled: true,
                    depends_on: None,
                },
                PriorityEntry {
                    uid: "uid-b".into(),
                    name: "My Aggregate".into(),
                    transport: TransportKind::Aggregate,
                    enabled: false,
                    depends_on: Some("USB Mic".into()),
                },
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        save(&path, &sample()).unwrap();
        assert_eq!(load(&path), sample());
    }

    #[test]
    fn test_output_is_pretty_with_sorted_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        save(&path, &sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let enabled = text.find("\"enabled\"").unwrap();
        let name = text.find("\"name\"").unwrap();
        let transport = text.find("\"transportType\"").unwrap();
        assert!(enabled < name);
        assert!(name < transport);
    }

    #[test]
    fn test_missing_file_defaults_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(load(&dir.path().join("absent.json")), StoredConfig::default());
    }

    #[test]
    fn test_corrupt_file_defaults_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(load(&path), StoredConfig::default());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("config.json");
        save(&path, &StoredConfig::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        save(&path, &sample()).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("config.json")]);
    }
}
