use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(Uuid);

impl AlarmId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlarmId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// When an alarm is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Schedule {
    /// A single point in time.
    Fixed { at: DateTime<Utc> },
    /// A wall-clock time of day. An empty weekday set never repeats.
    Weekly {
        hour: u32,
        minute: u32,
        #[serde(default)]
        weekdays: Vec<Weekday>,
    },
}

/// Countdown intervals, stored in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    pub pre_alert_secs: Option<u64>,
    pub post_alert_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SleepContext {
    Nap,
    Night,
    PowerNap,
    Unspecified,
}

impl SleepContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepContext::Nap => "Nap",
            SleepContext::Night => "Night",
            SleepContext::PowerNap => "PowerNap",
            SleepContext::Unspecified => "Unspecified",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "Nap" => SleepContext::Nap,
            "Night" => SleepContext::Night,
            "PowerNap" => SleepContext::PowerNap,
            _ => SleepContext::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WakeReason {
    Work,
    School,
    Exercise,
    Travel,
    Other,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Work => "Work",
            WakeReason::School => "School",
            WakeReason::Exercise => "Exercise",
            WakeReason::Travel => "Travel",
            WakeReason::Other => "Other",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "Work" => WakeReason::Work,
            "School" => WakeReason::School,
            "Exercise" => WakeReason::Exercise,
            "Travel" => WakeReason::Travel,
            _ => WakeReason::Other,
        }
    }
}

/// Derived category. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmKind {
    Alarm,
    Timer,
    Custom,
    Unscheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: AlarmId,
    pub label: String,
    /// Time of day as shown to the user, e.g. "7:30 AM" or "07:30".
    pub display_time: String,
    pub schedule: Option<Schedule>,
    pub countdown: Option<Countdown>,
    pub enabled: bool,
    pub sound_id: String,
    pub sleep_context: SleepContext,
    pub wake_reason: WakeReason,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// Builds an enabled weekly alarm whose display time is rendered in 24-hour form.
    pub fn weekly(label: impl Into<String>, hour: u32, minute: u32, weekdays: Vec<Weekday>) -> Self {
        let now = Utc::now();
        Self {
            id: AlarmId::new(),
            label: label.into(),
            display_time: format!("{hour:02}:{minute:02}"),
            schedule: Some(Schedule::Weekly {
                hour,
                minute,
                weekdays,
            }),
            countdown: None,
            enabled: true,
            sound_id: "classic".into(),
            sleep_context: SleepContext::Unspecified,
            wake_reason: WakeReason::Other,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn timer(label: impl Into<String>, pre_alert_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: AlarmId::new(),
            label: label.into(),
            display_time: String::new(),
            schedule: None,
            countdown: Some(Countdown {
                pre_alert_secs: Some(pre_alert_secs),
                post_alert_secs: None,
            }),
            enabled: true,
            sound_id: "classic".into(),
            sleep_context: SleepContext::Nap,
            wake_reason: WakeReason::Other,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> AlarmKind {
        match (self.schedule.is_some(), self.countdown.is_some()) {
            (true, false) => AlarmKind::Alarm,
            (false, true) => AlarmKind::Timer,
            (true, true) => AlarmKind::Custom,
            (false, false) => AlarmKind::Unscheduled,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        match &self.schedule {
            Some(Schedule::Fixed { .. }) => true,
            Some(Schedule::Weekly { weekdays, .. }) => weekdays.is_empty(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_derived_from_schedule_and_countdown() {
        let mut alarm = Alarm::weekly("Morning", 7, 30, vec![Weekday::Mon]);
        assert_eq!(alarm.kind(), AlarmKind::Alarm);

        alarm.countdown = Some(Countdown {
            pre_alert_secs: Some(60),
            post_alert_secs: Some(30),
        });
        assert_eq!(alarm.kind(), AlarmKind::Custom);

        alarm.schedule = None;
        assert_eq!(alarm.kind(), AlarmKind::Timer);

        alarm.countdown = None;
        assert_eq!(alarm.kind(), AlarmKind::Unscheduled);
    }

    #[test]
    fn empty_weekday_set_is_one_shot() {
        let recurring = Alarm::weekly("Gym", 6, 0, vec![Weekday::Tue, Weekday::Thu]);
        assert!(!recurring.is_one_shot());

        let never_repeats = Alarm::weekly("Flight", 5, 15, Vec::new());
        assert!(never_repeats.is_one_shot());

        let mut fixed = Alarm::weekly("Fixed", 5, 15, Vec::new());
        fixed.schedule = Some(Schedule::Fixed { at: Utc::now() });
        assert!(fixed.is_one_shot());
    }

    #[test]
    fn alarm_id_parses_its_display_form() {
        let id = AlarmId::new();
        let parsed: AlarmId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<AlarmId>().is_err());
    }
}
