use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of the underlying alarm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AlarmState {
    Scheduled,
    Countdown,
    Paused,
    Alerting,
}

impl Default for AlarmState {
    fn default() -> Self {
        AlarmState::Scheduled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Alert,
    Countdown,
    Paused,
    None,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    pub phase: Phase,
    /// Start of the countdown segment currently running, if any.
    pub start_date: Option<DateTime<Utc>>,
    /// Countdown time from completed segments. Only grows on countdown -> paused.
    #[serde(with = "duration_ms")]
    pub previously_elapsed: Duration,
}

impl PresentationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, previous: AlarmState, next: AlarmState, now: DateTime<Utc>) {
        match (previous, next) {
            (AlarmState::Scheduled, AlarmState::Countdown) => {
                self.phase = Phase::Countdown;
                if self.start_date.is_none() {
                    self.start_date = Some(now);
                    self.previously_elapsed = Duration::ZERO;
                }
            }
            (AlarmState::Countdown, AlarmState::Paused) => {
                if let Some(start) = self.start_date {
                    self.previously_elapsed = self.previously_elapsed.saturating_add(span(start, now));
                }
                self.phase = Phase::Paused;
            }
            (AlarmState::Paused, AlarmState::Countdown) => {
                self.phase = Phase::Countdown;
                self.start_date = Some(now);
            }
            (_, AlarmState::Alerting) => {
                self.phase = Phase::Alert;
            }
            _ => {}
        }
    }

    /// Total countdown time at `now`, including the running segment.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match (self.phase, self.start_date) {
            (Phase::Countdown, Some(start)) => self.previously_elapsed.saturating_add(span(start, now)),
            _ => self.previously_elapsed,
        }
    }
}

fn span(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or(Duration::ZERO)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_countdown_sets_start_and_zero_elapsed() {
        let mut state = PresentationState::new();
        state.apply(AlarmState::Scheduled, AlarmState::Countdown, at(0));
        assert_eq!(state.phase, Phase::Countdown);
        assert_eq!(state.start_date, Some(at(0)));
        assert_eq!(state.previously_elapsed, Duration::ZERO);
    }

    #[test]
    fn elapsed_accumulates_completed_segments_only() {
        let mut state = PresentationState::new();
        state.apply(AlarmState::Scheduled, AlarmState::Countdown, at(0));
        state.apply(AlarmState::Countdown, AlarmState::Paused, at(40));
        assert_eq!(state.phase, Phase::Paused);
        assert_eq!(state.previously_elapsed, Duration::from_secs(40));

        // A paused stretch adds nothing.
        state.apply(AlarmState::Paused, AlarmState::Countdown, at(100));
        assert_eq!(state.start_date, Some(at(100)));
        assert_eq!(state.previously_elapsed, Duration::from_secs(40));

        state.apply(AlarmState::Countdown, AlarmState::Paused, at(125));
        assert_eq!(state.previously_elapsed, Duration::from_secs(65));
        assert_eq!(state.elapsed(at(500)), Duration::from_secs(65));
    }

    #[test]
    fn previously_elapsed_never_decreases() {
        let mut state = PresentationState::new();
        let mut last = Duration::ZERO;
        let mut now = 0;
        state.apply(AlarmState::Scheduled, AlarmState::Countdown, at(now));
        for step in 1..20 {
            now += step * 3;
            let (from, to) = if step % 2 == 1 {
                (AlarmState::Countdown, AlarmState::Paused)
            } else {
                (AlarmState::Paused, AlarmState::Countdown)
            };
            state.apply(from, to, at(now));
            assert!(state.previously_elapsed >= last);
            last = state.previously_elapsed;
        }
    }

    #[test]
    fn alerting_wins_from_any_phase() {
        let mut state = PresentationState::new();
        state.apply(AlarmState::Scheduled, AlarmState::Countdown, at(0));
        state.apply(AlarmState::Countdown, AlarmState::Paused, at(5));
        state.apply(AlarmState::Paused, AlarmState::Alerting, at(6));
        assert_eq!(state.phase, Phase::Alert);
        assert_eq!(state.previously_elapsed, Duration::from_secs(5));
    }

    #[test]
    fn unrelated_transition_keeps_phase() {
        let mut state = PresentationState::new();
        state.apply(AlarmState::Scheduled, AlarmState::Paused, at(0));
        assert_eq!(state.phase, Phase::None);
        assert_eq!(state.start_date, None);
    }

    #[test]
    fn serde_round_trip_is_exact() {
        let state = PresentationState {
            phase: Phase::Paused,
            start_date: Some(Utc.timestamp_millis_opt(1_700_000_123_456).unwrap()),
            previously_elapsed: Duration::from_millis(98_765),
        };
        let json = serde_json::to_string(&state).unwrap();
        let restored: PresentationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
