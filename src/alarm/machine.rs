use std::time::Duration;

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use serde::Serialize;

use crate::models::{Alarm, AlarmId, AlarmKind, Countdown, Schedule};

use super::state::{AlarmState, Phase, PresentationState};

/// The fields of an alarm the state machine needs, copied out of the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmProjection {
    pub id: AlarmId,
    pub schedule: Option<Schedule>,
    pub countdown: Option<Countdown>,
    pub state: AlarmState,
}

impl AlarmProjection {
    pub fn of(alarm: &Alarm) -> Self {
        Self {
            id: alarm.id,
            schedule: alarm.schedule.clone(),
            countdown: alarm.countdown,
            state: AlarmState::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmStateMachine {
    projection: AlarmProjection,
    presentation: Option<PresentationState>,
}

impl AlarmStateMachine {
    pub fn new(alarm: &Alarm) -> Self {
        Self {
            projection: AlarmProjection::of(alarm),
            presentation: None,
        }
    }

    pub fn id(&self) -> AlarmId {
        self.projection.id
    }

    pub fn state(&self) -> AlarmState {
        self.projection.state
    }

    pub fn presentation(&self) -> Option<&PresentationState> {
        self.presentation.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.presentation
            .as_ref()
            .map(|p| p.phase)
            .unwrap_or(Phase::None)
    }

    /// Picks up schedule edits without losing countdown progress.
    pub fn refresh(&mut self, alarm: &Alarm) {
        self.projection.schedule = alarm.schedule.clone();
        self.projection.countdown = alarm.countdown;
    }

    pub fn transition(&mut self, next: AlarmState, now: DateTime<Utc>) {
        let previous = self.projection.state;
        if next == AlarmState::Scheduled {
            self.presentation = None;
        } else {
            let needs_state = matches!(next, AlarmState::Countdown | AlarmState::Alerting);
            if self.presentation.is_none() && needs_state {
                self.presentation = Some(PresentationState::new());
            }
            if let Some(presentation) = self.presentation.as_mut() {
                presentation.apply(previous, next, now);
            }
        }
        self.projection.state = next;
    }

    pub fn kind(&self) -> AlarmKind {
        match (&self.projection.schedule, &self.projection.countdown) {
            (Some(_), None) => AlarmKind::Alarm,
            (None, Some(_)) => AlarmKind::Timer,
            (Some(_), Some(_)) => AlarmKind::Custom,
            (None, None) => AlarmKind::Unscheduled,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        match &self.projection.schedule {
            Some(Schedule::Fixed { .. }) => true,
            Some(Schedule::Weekly { weekdays, .. }) => weekdays.is_empty(),
            None => false,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.presentation
            .as_ref()
            .map(|p| p.elapsed(now))
            .unwrap_or(Duration::ZERO)
    }

    fn pre_alert(&self) -> Option<Duration> {
        self.projection
            .countdown
            .and_then(|c| c.pre_alert_secs)
            .map(Duration::from_secs)
    }

    /// True once a running countdown has used up its pre-alert interval.
    pub fn countdown_expired(&self, now: DateTime<Utc>) -> bool {
        if self.projection.state != AlarmState::Countdown {
            return false;
        }
        match self.pre_alert() {
            Some(limit) => self.elapsed(now) >= limit,
            None => false,
        }
    }

    pub fn effective_fire_date<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match &self.projection.schedule {
            Some(Schedule::Fixed { at }) => Some(at.with_timezone(&now.timezone())),
            Some(Schedule::Weekly {
                hour,
                minute,
                weekdays,
            }) => next_weekly_occurrence(now, *hour, *minute, weekdays),
            None => {
                let remaining = self
                    .pre_alert()?
                    .checked_sub(self.elapsed(now.with_timezone(&Utc)))
                    .unwrap_or(Duration::ZERO);
                let remaining = chrono::Duration::from_std(remaining).ok()?;
                Some(now.clone() + remaining)
            }
        }
    }
}

/// Next `hour:minute` not earlier than `now`. With weekdays, only days in the
/// set qualify; without, today or tomorrow.
pub fn next_weekly_occurrence<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
    weekdays: &[chrono::Weekday],
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();
    // Eight days covers every weekday plus today's already-passed time.
    for offset in 0..=8u64 {
        let day = today.checked_add_days(Days::new(offset))?;
        if !weekdays.is_empty() && !weekdays.contains(&day.weekday()) {
            continue;
        }
        let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
            return None;
        };
        // Skip times that fall in a DST gap.
        let Some(candidate) = tz.from_local_datetime(&naive).earliest() else {
            continue;
        };
        if candidate >= *now {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekly_alarm_later_today_fires_today() {
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let machine = AlarmStateMachine::new(&alarm);
        let now = utc(2024, 3, 4, 6, 0);
        assert_eq!(machine.effective_fire_date(&now), Some(utc(2024, 3, 4, 7, 30)));
    }

    #[test]
    fn passed_time_rolls_to_next_day() {
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let machine = AlarmStateMachine::new(&alarm);
        let now = utc(2024, 3, 4, 8, 0);
        assert_eq!(machine.effective_fire_date(&now), Some(utc(2024, 3, 5, 7, 30)));
    }

    #[test]
    fn recurring_alarm_skips_to_next_selected_weekday() {
        // 2024-03-04 is a Monday.
        let alarm = Alarm::weekly("Gym", 6, 0, vec![Weekday::Mon, Weekday::Thu]);
        let machine = AlarmStateMachine::new(&alarm);
        let now = utc(2024, 3, 4, 7, 0);
        assert_eq!(machine.effective_fire_date(&now), Some(utc(2024, 3, 7, 6, 0)));

        let next_monday = utc(2024, 3, 8, 7, 0);
        assert_eq!(
            machine.effective_fire_date(&next_monday),
            Some(utc(2024, 3, 11, 6, 0))
        );
    }

    #[test]
    fn timer_fire_date_accounts_for_elapsed_countdown() {
        let alarm = Alarm::timer("Tea", 300);
        let mut machine = AlarmStateMachine::new(&alarm);
        let start = utc(2024, 3, 4, 12, 0);
        machine.transition(AlarmState::Countdown, start);
        machine.transition(AlarmState::Paused, start + chrono::Duration::seconds(100));

        let now = start + chrono::Duration::seconds(1000);
        assert_eq!(
            machine.effective_fire_date(&now),
            Some(now + chrono::Duration::seconds(200))
        );
        assert_eq!(machine.kind(), AlarmKind::Timer);
        assert!(!machine.is_one_shot());
    }

    #[test]
    fn countdown_expires_after_pre_alert_interval() {
        let alarm = Alarm::timer("Nap", 60);
        let mut machine = AlarmStateMachine::new(&alarm);
        let start = utc(2024, 3, 4, 12, 0);
        machine.transition(AlarmState::Countdown, start);
        assert!(!machine.countdown_expired(start + chrono::Duration::seconds(59)));
        assert!(machine.countdown_expired(start + chrono::Duration::seconds(60)));

        machine.transition(AlarmState::Paused, start + chrono::Duration::seconds(30));
        assert!(!machine.countdown_expired(start + chrono::Duration::seconds(600)));
    }

    #[test]
    fn returning_to_scheduled_drops_presentation() {
        let alarm = Alarm::timer("Nap", 60);
        let mut machine = AlarmStateMachine::new(&alarm);
        let start = utc(2024, 3, 4, 12, 0);
        machine.transition(AlarmState::Countdown, start);
        machine.transition(AlarmState::Alerting, start);
        assert_eq!(machine.phase(), Phase::Alert);

        machine.transition(AlarmState::Scheduled, start);
        assert!(machine.presentation().is_none());
        assert_eq!(machine.phase(), Phase::None);
    }

    #[test]
    fn alerting_without_countdown_creates_presentation() {
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let mut machine = AlarmStateMachine::new(&alarm);
        machine.transition(AlarmState::Alerting, utc(2024, 3, 4, 7, 30));
        assert_eq!(machine.phase(), Phase::Alert);
        assert_eq!(machine.state(), AlarmState::Alerting);
    }
}
