use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use chrono::{Local, Timelike, Utc};
use log::info;
use slotmap::{new_key_type, SlotMap};

use crate::alarm::parse_display_time;
use crate::db::Database;
use crate::models::{Alarm, AlarmId, Schedule};

new_key_type! {
    struct AlarmKey;
}

/// Read-only view of the alarm set, as seen by the poller and the engine.
pub trait AlarmSource: Send + Sync {
    fn list_enabled_alarms(&self) -> Vec<Alarm>;
    fn alarm(&self, id: &AlarmId) -> Option<Alarm>;
}

#[derive(Default)]
struct Arena {
    alarms: SlotMap<AlarmKey, Alarm>,
    by_id: HashMap<AlarmId, AlarmKey>,
}

impl Arena {
    fn insert(&mut self, alarm: Alarm) {
        if let Some(key) = self.by_id.get(&alarm.id) {
            if let Some(slot) = self.alarms.get_mut(*key) {
                *slot = alarm;
                return;
            }
        }
        let id = alarm.id;
        let key = self.alarms.insert(alarm);
        self.by_id.insert(id, key);
    }

    fn get(&self, id: &AlarmId) -> Option<&Alarm> {
        self.by_id.get(id).and_then(|key| self.alarms.get(*key))
    }

    fn get_mut(&mut self, id: &AlarmId) -> Option<&mut Alarm> {
        let key = *self.by_id.get(id)?;
        self.alarms.get_mut(key)
    }

    fn remove(&mut self, id: &AlarmId) -> Option<Alarm> {
        let key = self.by_id.remove(id)?;
        self.alarms.remove(key)
    }
}

/// Owner of all alarm records. Every mutation is written to SQLite before the
/// in-memory arena changes, so a failed write leaves both sides consistent.
pub struct AlarmRegistry {
    db: Database,
    arena: RwLock<Arena>,
}

impl AlarmRegistry {
    pub async fn load(db: Database) -> Result<Self> {
        let alarms = db.list_alarms().await?;
        let mut arena = Arena::default();
        let count = alarms.len();
        for alarm in alarms {
            arena.insert(alarm);
        }
        info!("Loaded {count} alarms");

        Ok(Self {
            db,
            arena: RwLock::new(arena),
        })
    }

    pub async fn add(&self, alarm: Alarm) -> Result<Alarm> {
        validate(&alarm)?;
        self.db.upsert_alarm(&alarm).await?;
        self.write().insert(alarm.clone());
        Ok(alarm)
    }

    pub async fn update(&self, mut alarm: Alarm) -> Result<Alarm> {
        if self.read().get(&alarm.id).is_none() {
            return Err(anyhow!("alarm {} not found", alarm.id));
        }
        validate(&alarm)?;
        alarm.updated_at = Utc::now();
        self.db.upsert_alarm(&alarm).await?;
        self.write().insert(alarm.clone());
        Ok(alarm)
    }

    pub async fn set_enabled(&self, id: AlarmId, enabled: bool) -> Result<()> {
        if self.read().get(&id).is_none() {
            return Err(anyhow!("alarm {id} not found"));
        }
        let now = Utc::now();
        self.db.set_alarm_enabled(id, enabled, now).await?;
        if let Some(alarm) = self.write().get_mut(&id) {
            alarm.enabled = enabled;
            alarm.updated_at = now;
        }
        Ok(())
    }

    pub async fn remove(&self, id: AlarmId) -> Result<Option<Alarm>> {
        self.db.delete_alarm(id).await?;
        Ok(self.write().remove(&id))
    }

    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.read().alarms.values().cloned().collect();
        alarms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        alarms
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Arena> {
        match self.arena.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arena> {
        match self.arena.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The poller matches on `display_time` and repeats are planned from
/// `schedule`, so the two must name the same minute.
fn validate(alarm: &Alarm) -> Result<()> {
    let Some(schedule) = &alarm.schedule else {
        return Ok(());
    };
    if alarm.display_time.trim().is_empty() {
        bail!("scheduled alarm {} has no display time", alarm.id);
    }
    let shown = parse_display_time(&alarm.display_time)?;
    let scheduled = match schedule {
        Schedule::Weekly { hour, minute, .. } => (*hour, *minute),
        Schedule::Fixed { at } => {
            let local = at.with_timezone(&Local);
            (local.hour(), local.minute())
        }
    };
    if shown != scheduled {
        bail!(
            "alarm {} shows {} but is scheduled for {:02}:{:02}",
            alarm.id,
            alarm.display_time,
            scheduled.0,
            scheduled.1
        );
    }
    Ok(())
}

impl AlarmSource for AlarmRegistry {
    fn list_enabled_alarms(&self) -> Vec<Alarm> {
        self.list().into_iter().filter(|a| a.enabled).collect()
    }

    fn alarm(&self, id: &AlarmId) -> Option<Alarm> {
        self.read().get(id).cloned()
    }
}
