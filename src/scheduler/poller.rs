use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike, Utc};
use serde::Serialize;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::alarm::{parse_display_time, AlarmState, AlarmStateMachine, Phase};
use crate::audio::AlarmAudio;
use crate::models::{Alarm, AlarmId, Schedule};
use crate::overlay::OverlayCoordinator;
use crate::registry::AlarmSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Wait after dismissal before touching the audio channel again.
    pub dismiss_grace: Duration,
    pub snooze: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            dismiss_grace: Duration::from_millis(500),
            snooze: Duration::from_secs(9 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FireTrigger {
    Scheduled,
    Countdown,
    Snooze,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RingingSession {
    pub alarm: Alarm,
    pub started_at: DateTime<Utc>,
    pub trigger: FireTrigger,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snooze {
    pub alarm_id: AlarmId,
    pub due: DateTime<Utc>,
}

/// Wall-clock minute an alarm last fired in.
type MinuteKey = (NaiveDate, u32, u32);

fn minute_key<Tz: TimeZone>(now: &DateTime<Tz>) -> MinuteKey {
    (now.date_naive(), now.hour(), now.minute())
}

#[derive(Default)]
struct PollerState {
    session: Option<RingingSession>,
    machines: HashMap<AlarmId, AlarmStateMachine>,
    snoozes: Vec<Snooze>,
    last_fired: HashMap<AlarmId, MinuteKey>,
}

impl PollerState {
    /// Drops per-alarm state for anything no longer enabled.
    fn sync_machines(&mut self, alarms: &[Alarm]) {
        let known = |id: &AlarmId| alarms.iter().any(|alarm| alarm.id == *id);
        self.machines.retain(|id, _| known(id));
        self.last_fired.retain(|id, _| known(id));
        self.snoozes.retain(|snooze| known(&snooze.alarm_id));
        for alarm in alarms {
            self.machines
                .entry(alarm.id)
                .and_modify(|machine| machine.refresh(alarm))
                .or_insert_with(|| AlarmStateMachine::new(alarm));
        }
    }

    fn is_paused(&self, id: &AlarmId) -> bool {
        self.machines
            .get(id)
            .map(|m| m.phase() == Phase::Paused)
            .unwrap_or(false)
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

struct PollerInner {
    source: Arc<dyn AlarmSource>,
    audio: Arc<dyn AlarmAudio>,
    overlay: OverlayCoordinator,
    config: PollerConfig,
    state: Mutex<PollerState>,
    ticker: Mutex<Option<Ticker>>,
    shutdown: CancellationToken,
}

/// Periodically matches enabled alarms against the wall clock and owns the
/// single ringing session. It is the only writer of ringing state.
#[derive(Clone)]
pub struct BackgroundPoller {
    inner: Arc<PollerInner>,
}

impl BackgroundPoller {
    pub fn new(
        source: Arc<dyn AlarmSource>,
        audio: Arc<dyn AlarmAudio>,
        overlay: OverlayCoordinator,
        config: PollerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                source,
                audio,
                overlay,
                config,
                state: Mutex::new(PollerState::default()),
                ticker: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Starts the periodic check. The first tick runs immediately.
    pub async fn start(&self) {
        let mut ticker_guard = self.inner.ticker.lock().await;
        if let Some(ticker) = ticker_guard.as_ref() {
            if !ticker.token.is_cancelled() && !ticker.handle.is_finished() {
                return;
            }
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let token = self.inner.shutdown.child_token();
        let loop_token = token.clone();
        let poller = self.clone();
        let period = self.inner.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        poller.tick_at(Local::now()).await;
                    }
                    _ = loop_token.cancelled() => {
                        log_debug!("poll timer stopped");
                        break;
                    }
                }
            }
        });

        log_info!("poll timer started (every {:?})", period);
        *ticker_guard = Some(Ticker { handle, token });
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .await
            .as_ref()
            .map(|t| !t.token.is_cancelled() && !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the timer but lets an in-flight tick finish.
    async fn suspend(&self) {
        if let Some(ticker) = self.inner.ticker.lock().await.take() {
            ticker.token.cancel();
        }
    }

    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(ticker) = self.inner.ticker.lock().await.take() {
            ticker.token.cancel();
            let _ = ticker.handle.await;
        }
        self.inner.audio.stop_alarm();
    }

    /// One poll step against `now`. Returns the alarm that started ringing.
    pub async fn tick_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Option<AlarmId> {
        let alarms = self.inner.source.list_enabled_alarms();
        let utc_now = now.with_timezone(&Utc);
        let key = minute_key(&now);

        let fired = {
            let mut state = self.inner.state.lock().await;
            if state.session.is_some() {
                log_debug!("tick skipped: alarm already ringing");
                return None;
            }
            state.sync_machines(&alarms);

            let picked = self
                .due_snooze(&mut state, utc_now)
                .or_else(|| expired_countdown(&state, &alarms, utc_now))
                .or_else(|| scheduled_match(&state, &alarms, &now, key));

            let (alarm, trigger) = picked?;
            state.last_fired.insert(alarm.id, key);
            if let Some(machine) = state.machines.get_mut(&alarm.id) {
                machine.transition(AlarmState::Alerting, utc_now);
            }
            state.session = Some(RingingSession {
                alarm: alarm.clone(),
                started_at: utc_now,
                trigger,
            });
            alarm
        };

        log_info!(
            "alarm {} ({}) ringing at {}",
            fired.id,
            fired.label,
            utc_now.to_rfc3339()
        );
        self.inner.audio.suspend_keep_alive();
        self.inner.audio.start_alarm(&fired.sound_id);
        self.inner.overlay.show_ringing(&fired);
        self.suspend().await;

        Some(fired.id)
    }

    fn due_snooze(&self, state: &mut PollerState, now: DateTime<Utc>) -> Option<(Alarm, FireTrigger)> {
        let position = state.snoozes.iter().position(|s| s.due <= now)?;
        let snooze = state.snoozes.remove(position);
        match self.inner.source.alarm(&snooze.alarm_id) {
            Some(alarm) if alarm.enabled => Some((alarm, FireTrigger::Snooze)),
            _ => {
                log_info!("dropping snooze for inactive alarm {}", snooze.alarm_id);
                None
            }
        }
    }

    /// Forgets a pending snooze. Returns whether one was queued.
    pub async fn cancel_snooze(&self, id: AlarmId) -> bool {
        let mut state = self.inner.state.lock().await;
        let before = state.snoozes.len();
        state.snoozes.retain(|s| s.alarm_id != id);
        before != state.snoozes.len()
    }

    pub async fn dismiss(&self) -> Option<RingingSession> {
        self.end_session(Utc::now(), false).await
    }

    /// Ends the ringing session and queues a re-fire after the snooze delay.
    pub async fn snooze(&self, now: DateTime<Utc>) -> Option<Snooze> {
        let session = self.end_session(now, true).await?;
        let state = self.inner.state.lock().await;
        state.snoozes.last().cloned().filter(|s| s.alarm_id == session.alarm.id)
    }

    async fn end_session(&self, now: DateTime<Utc>, snooze: bool) -> Option<RingingSession> {
        // Playback stops unconditionally, even if nothing is recorded as ringing.
        self.inner.audio.stop_alarm();

        let session = {
            let mut state = self.inner.state.lock().await;
            let session = state.session.take()?;
            if let Some(machine) = state.machines.get_mut(&session.alarm.id) {
                machine.transition(AlarmState::Scheduled, now);
            }
            if snooze {
                let due = now
                    + chrono::Duration::from_std(self.inner.config.snooze)
                        .unwrap_or_else(|_| chrono::Duration::minutes(9));
                state.snoozes.retain(|s| s.alarm_id != session.alarm.id);
                state.snoozes.push(Snooze {
                    alarm_id: session.alarm.id,
                    due,
                });
                self.inner.overlay.snooze(due);
            } else {
                self.inner.overlay.dismiss();
            }
            session
        };

        log_info!(
            "alarm {} {}",
            session.alarm.id,
            if snooze { "snoozed" } else { "dismissed" }
        );
        self.resume_after_grace();
        Some(session)
    }

    fn resume_after_grace(&self) {
        let poller = self.clone();
        let grace = self.inner.config.dismiss_grace;
        tokio::spawn(async move {
            time::sleep(grace).await;
            if poller.inner.state.lock().await.session.is_some() {
                return;
            }
            poller.inner.audio.restore_keep_alive();
            poller.start().await;
        });
    }

    pub async fn ringing(&self) -> Option<RingingSession> {
        self.inner.state.lock().await.session.clone()
    }

    pub async fn snoozes(&self) -> Vec<Snooze> {
        self.inner.state.lock().await.snoozes.clone()
    }

    pub async fn machine(&self, id: &AlarmId) -> Option<AlarmStateMachine> {
        self.inner.state.lock().await.machines.get(id).cloned()
    }

    pub async fn start_countdown(&self, id: AlarmId, now: DateTime<Utc>) -> Result<()> {
        self.transition(id, AlarmState::Scheduled, AlarmState::Countdown, now)
            .await
    }

    pub async fn pause_countdown(&self, id: AlarmId, now: DateTime<Utc>) -> Result<()> {
        self.transition(id, AlarmState::Countdown, AlarmState::Paused, now)
            .await
    }

    pub async fn resume_countdown(&self, id: AlarmId, now: DateTime<Utc>) -> Result<()> {
        self.transition(id, AlarmState::Paused, AlarmState::Countdown, now)
            .await
    }

    async fn transition(
        &self,
        id: AlarmId,
        expected: AlarmState,
        next: AlarmState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let alarm = self
            .inner
            .source
            .alarm(&id)
            .filter(|a| a.enabled)
            .ok_or_else(|| anyhow!("alarm {id} is not enabled"))?;
        if alarm.countdown.is_none() {
            bail!("alarm {id} has no countdown");
        }

        let mut state = self.inner.state.lock().await;
        let machine = state
            .machines
            .entry(id)
            .or_insert_with(|| AlarmStateMachine::new(&alarm));
        if machine.state() != expected {
            bail!(
                "alarm {id} is {:?}, cannot move to {:?}",
                machine.state(),
                next
            );
        }
        machine.transition(next, now);
        Ok(())
    }
}

fn expired_countdown(
    state: &PollerState,
    alarms: &[Alarm],
    now: DateTime<Utc>,
) -> Option<(Alarm, FireTrigger)> {
    alarms
        .iter()
        .find(|alarm| {
            state
                .machines
                .get(&alarm.id)
                .map(|m| m.countdown_expired(now))
                .unwrap_or(false)
        })
        .map(|alarm| (alarm.clone(), FireTrigger::Countdown))
}

fn scheduled_match<Tz: TimeZone>(
    state: &PollerState,
    alarms: &[Alarm],
    now: &DateTime<Tz>,
    key: MinuteKey,
) -> Option<(Alarm, FireTrigger)> {
    let (hour, minute) = (now.hour(), now.minute());
    for alarm in alarms {
        // Pure timers have no wall-clock time.
        if alarm.display_time.trim().is_empty() {
            continue;
        }
        let (alarm_hour, alarm_minute) = match parse_display_time(&alarm.display_time) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("skipping alarm {}: {e}", alarm.id);
                continue;
            }
        };
        if (alarm_hour, alarm_minute) != (hour, minute) || !rings_on(alarm, now, key) {
            continue;
        }
        if state.is_paused(&alarm.id) {
            continue;
        }
        if state.last_fired.get(&alarm.id) == Some(&key) {
            log_debug!("alarm {} already fired this minute", alarm.id);
            continue;
        }
        return Some((alarm.clone(), FireTrigger::Scheduled));
    }
    None
}

/// Date gate on top of the time-of-day match.
fn rings_on<Tz: TimeZone>(alarm: &Alarm, now: &DateTime<Tz>, key: MinuteKey) -> bool {
    match &alarm.schedule {
        Some(Schedule::Fixed { at }) => minute_key(&at.with_timezone(&now.timezone())) == key,
        Some(Schedule::Weekly { weekdays, .. }) if !weekdays.is_empty() => {
            weekdays.contains(&now.weekday())
        }
        _ => true,
    }
}
