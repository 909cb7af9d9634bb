//! Last-good snapshot of the three sources, persisted as JSON.
//!
//! Only used to show something between startup and the first successful fetch; a loaded
//! snapshot is always replaced by live data once it arrives.

use crate::models::dispenser::{AnalyticsRecord, DeviceRecord, RealtimeStatusRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl core::fmt::Display for CacheError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "io error: {}", e),
            CacheError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(value: io::Error) -> Self {
        CacheError::Io(value)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(value: serde_json::Error) -> Self {
        CacheError::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub devices: Option<Vec<DeviceRecord>>,
    #[serde(default)]
    pub analytics: Option<Vec<AnalyticsRecord>>,
    #[serde(default)]
    pub realtime: Option<Vec<RealtimeStatusRecord>>,
}

/// `Ok(None)` when no snapshot has been written yet.
pub fn load(path: &Path) -> Result<Option<Snapshot>, CacheError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Write through a sibling temp file and rename, so readers never see a partial snapshot.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), CacheError> {
    let serialized = serde_json::to_vec(snapshot)?;
    let tmp = temp_path(path);
    fs::write(&tmp, serialized)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dispenser::{DeviceId, PowerStatus};

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dispenser-monitor-{}-{}", std::process::id(), name));
        fs::create_dir_all(&dir).unwrap();
        dir.join("snapshot.json")
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn snapshot_survives_save_and_load() {
        let path = scratch_path("roundtrip");
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            devices: Some(vec![DeviceRecord {
                id: Some(DeviceId(4)),
                name: Some("Gym".into()),
                ..Default::default()
            }]),
            analytics: None,
            realtime: Some(vec![
                RealtimeStatusRecord {
                    device_id: Some(DeviceId(4)),
                    power_status: PowerStatus::Null,
                    battery_percentage: Some(42.5),
                    ..Default::default()
                },
                RealtimeStatusRecord {
                    device_id: Some(DeviceId(5)),
                    pwrstatus: PowerStatus::Reported("on".into()),
                    ..Default::default()
                },
            ]),
        };
        save(&path, &snapshot).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let path = scratch_path("corrupt");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(CacheError::Json(_))));
    }
}
