use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::audio::AudioConfig;
use crate::scheduler::PollerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollSettings {
    pub interval_secs: u64,
    /// Used instead of `interval_secs` when DAWNBELL_DEBUG=1.
    pub debug_interval_secs: u64,
    pub dismiss_grace_ms: u64,
    pub snooze_minutes: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            debug_interval_secs: 5,
            dismiss_grace_ms: 500,
            snooze_minutes: 9,
        }
    }
}

impl PollSettings {
    pub fn to_config(&self, debug: bool) -> PollerConfig {
        let interval = if debug {
            self.debug_interval_secs
        } else {
            self.interval_secs
        };
        PollerConfig {
            poll_interval: Duration::from_secs(interval.max(1)),
            dismiss_grace: Duration::from_millis(self.dismiss_grace_ms),
            snooze: Duration::from_secs(self.snooze_minutes * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioSettings {
    pub pulse_interval_ms: u64,
    pub health_check_secs: u64,
    pub keep_alive_volume: f32,
    /// Defaults to `<data dir>/sounds`.
    pub sounds_dir: Option<PathBuf>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            pulse_interval_ms: 600,
            health_check_secs: 2,
            keep_alive_volume: 0.01,
            sounds_dir: None,
        }
    }
}

impl AudioSettings {
    pub fn to_config(&self) -> AudioConfig {
        AudioConfig {
            pulse_interval: Duration::from_millis(self.pulse_interval_ms.max(50)),
            health_check_interval: Duration::from_secs(self.health_check_secs.max(1)),
            keep_alive_volume: self.keep_alive_volume.clamp(0.0, 1.0),
        }
    }
}

const MAX_MARKER_AGE_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationSettings {
    pub total_repeats: u32,
    pub repeat_spacing_secs: u64,
    pub query_timeout_secs: u64,
    pub pump_interval_secs: u64,
    pub marker_max_age_hours: i64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            total_repeats: 6,
            repeat_spacing_secs: 60,
            query_timeout_secs: 3,
            pump_interval_secs: 1,
            marker_max_age_hours: 12,
        }
    }
}

impl NotificationSettings {
    pub fn repeat_spacing(&self) -> Duration {
        Duration::from_secs(self.repeat_spacing_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_secs(self.pump_interval_secs.max(1))
    }

    /// Clamped to one year so a hand-edited value cannot overflow.
    pub fn marker_max_age(&self) -> chrono::Duration {
        let hours = self.marker_max_age_hours.clamp(0, MAX_MARKER_AGE_HOURS);
        chrono::Duration::try_hours(hours).unwrap_or_else(|| chrono::Duration::hours(12))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub poll: PollSettings,
    pub audio: AudioSettings,
    pub notification: NotificationSettings,
    /// `last_activity` of the most recent dismissal marker already acted on.
    pub last_consumed_marker: Option<DateTime<Utc>>,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring malformed settings in {}: {e}", path.display());
                EngineSettings::default()
            })
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> EngineSettings {
        self.read().clone()
    }

    pub fn last_consumed_marker(&self) -> Option<DateTime<Utc>> {
        self.read().last_consumed_marker
    }

    pub fn set_last_consumed_marker(&self, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.write();
        guard.last_consumed_marker = Some(at);
        self.persist(&guard)
    }

    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: EngineSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "poll": { "snoozeMinutes": 5 } }"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().snapshot();
        assert_eq!(settings.poll.snooze_minutes, 5);
        assert_eq!(settings.poll.interval_secs, 60);
        assert_eq!(settings.notification, NotificationSettings::default());
        assert!(settings.last_consumed_marker.is_none());
    }

    #[test]
    fn malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(
            SettingsStore::new(path).unwrap().snapshot(),
            EngineSettings::default()
        );
    }

    #[test]
    fn consumed_marker_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        let at = Utc::now();
        store.set_last_consumed_marker(at).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.last_consumed_marker(), Some(at));
        reopened.reload().unwrap();
        assert_eq!(reopened.last_consumed_marker(), Some(at));
    }

    #[test]
    fn debug_flag_shortens_poll_interval() {
        let poll = PollSettings::default();
        assert_eq!(poll.to_config(false).poll_interval, Duration::from_secs(60));
        assert_eq!(poll.to_config(true).poll_interval, Duration::from_secs(5));
        assert_eq!(poll.to_config(false).snooze, Duration::from_secs(540));
    }

    #[test]
    fn out_of_range_marker_age_is_clamped() {
        let mut notification = NotificationSettings::default();
        assert_eq!(notification.marker_max_age(), chrono::Duration::hours(12));

        notification.marker_max_age_hours = i64::MAX;
        assert_eq!(
            notification.marker_max_age(),
            chrono::Duration::hours(MAX_MARKER_AGE_HOURS)
        );

        notification.marker_max_age_hours = -5;
        assert_eq!(notification.marker_max_age(), chrono::Duration::zero());
    }
}
