use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::AlarmError;
use crate::models::AlarmId;

/// Left behind when repeats were cut short, so the main process can react the
/// next time it looks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissalMarker {
    pub last_activity: DateTime<Utc>,
    pub cancelled_alarm_id: AlarmId,
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes through a temp file and a rename so readers never see half a marker.
    pub fn write(&self, marker: &DismissalMarker) -> Result<(), AlarmError> {
        let serialized = serde_json::to_string_pretty(marker)
            .map_err(|e| AlarmError::PersistenceWriteFailure(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized).map_err(|e| {
            AlarmError::PersistenceWriteFailure(format!("{}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            AlarmError::PersistenceWriteFailure(format!("{}: {e}", self.path.display()))
        })
    }

    pub fn read(&self) -> Option<DismissalMarker> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read marker {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Ignoring unreadable marker {}: {e}", self.path.display());
                None
            }
        }
    }
}
