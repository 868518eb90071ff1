use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json_column, parse_alarm_id, parse_datetime, to_json_column},
};
use crate::models::{Alarm, AlarmId, SleepContext, WakeReason};

const ALARM_COLUMNS: &str = "id, label, display_time, schedule, countdown, enabled, sound_id,
     sleep_context, wake_reason, created_at, updated_at";

fn row_to_alarm(row: &Row) -> Result<Alarm> {
    let id: String = row.get("id")?;
    let schedule: Option<String> = row.get("schedule")?;
    let countdown: Option<String> = row.get("countdown")?;
    let sleep_context: String = row.get("sleep_context")?;
    let wake_reason: String = row.get("wake_reason")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Alarm {
        id: parse_alarm_id(&id)?,
        label: row.get("label")?,
        display_time: row.get("display_time")?,
        schedule: from_json_column(schedule, "schedule")?,
        countdown: from_json_column(countdown, "countdown")?,
        enabled: row.get("enabled")?,
        sound_id: row.get("sound_id")?,
        sleep_context: SleepContext::from_db(&sleep_context),
        wake_reason: WakeReason::from_db(&wake_reason),
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn upsert_alarm(&self, alarm: &Alarm) -> Result<()> {
        let record = alarm.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alarms (id, label, display_time, schedule, countdown, enabled, sound_id,
                                     sleep_context, wake_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     label = excluded.label,
                     display_time = excluded.display_time,
                     schedule = excluded.schedule,
                     countdown = excluded.countdown,
                     enabled = excluded.enabled,
                     sound_id = excluded.sound_id,
                     sleep_context = excluded.sleep_context,
                     wake_reason = excluded.wake_reason,
                     updated_at = excluded.updated_at",
                params![
                    record.id.to_string(),
                    record.label,
                    record.display_time,
                    to_json_column(record.schedule.as_ref(), "schedule")?,
                    to_json_column(record.countdown.as_ref(), "countdown")?,
                    record.enabled,
                    record.sound_id,
                    record.sleep_context.as_str(),
                    record.wake_reason.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert alarm")?;
            Ok(())
        })
        .await
    }

    pub async fn set_alarm_enabled(
        &self,
        id: AlarmId,
        enabled: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE alarms
                 SET enabled = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![enabled, updated_at.to_rfc3339(), id.to_string()],
            )
            .with_context(|| "failed to update alarm enabled flag")?;
            Ok(())
        })
        .await
    }

    pub async fn delete_alarm(&self, id: AlarmId) -> Result<()> {
        self.execute(move |conn| {
            conn.execute("DELETE FROM alarms WHERE id = ?1", params![id.to_string()])
                .with_context(|| "failed to delete alarm")?;
            Ok(())
        })
        .await
    }

    pub async fn list_alarms(&self) -> Result<Vec<Alarm>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALARM_COLUMNS} FROM alarms ORDER BY created_at ASC, id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(row_to_alarm(row)?);
            }
            Ok(alarms)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Countdown, Schedule};
    use chrono::Weekday;

    #[tokio::test]
    async fn alarm_round_trips_through_sqlite() {
        let db = Database::in_memory().unwrap();
        let mut alarm = Alarm::weekly("Morning", 6, 45, vec![Weekday::Mon, Weekday::Fri]);
        alarm.countdown = Some(Countdown {
            pre_alert_secs: Some(600),
            post_alert_secs: None,
        });
        alarm.sleep_context = SleepContext::Night;
        alarm.wake_reason = WakeReason::Work;

        db.upsert_alarm(&alarm).await.unwrap();
        let stored = db.list_alarms().await.unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, alarm.id);
        assert_eq!(stored[0].schedule, alarm.schedule);
        assert_eq!(stored[0].countdown, alarm.countdown);
        assert_eq!(stored[0].sleep_context, SleepContext::Night);
        assert_eq!(stored[0].wake_reason, WakeReason::Work);
        assert_eq!(stored[0].created_at, alarm.created_at);
    }

    #[tokio::test]
    async fn upsert_updates_and_delete_removes() {
        let db = Database::in_memory().unwrap();
        let mut alarm = Alarm::weekly("Morning", 6, 45, Vec::new());
        db.upsert_alarm(&alarm).await.unwrap();

        alarm.label = "Earlier".into();
        alarm.schedule = Some(Schedule::Weekly {
            hour: 6,
            minute: 0,
            weekdays: Vec::new(),
        });
        db.upsert_alarm(&alarm).await.unwrap();
        db.set_alarm_enabled(alarm.id, false, Utc::now()).await.unwrap();

        let stored = db.list_alarms().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].label, "Earlier");
        assert!(!stored[0].enabled);

        db.delete_alarm(alarm.id).await.unwrap();
        assert!(db.list_alarms().await.unwrap().is_empty());
    }
}
