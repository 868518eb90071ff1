use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alarm::AlarmStateMachine;
use crate::audio::AlarmAudio;
use crate::db::Database;
use crate::models::{Alarm, AlarmId};
use crate::notification::{
    DeliveryPump, LocalNotificationCenter, MarkerStore, NotificationCenter, RepeatPlanner,
    RepetitionController,
};
use crate::overlay::OverlayCoordinator;
use crate::registry::{AlarmRegistry, AlarmSource};
use crate::scheduler::{BackgroundPoller, RingingSession, Snooze};
use crate::settings::SettingsStore;

/// Owns every component and routes user actions between them.
pub struct AlarmEngine {
    registry: Arc<AlarmRegistry>,
    poller: BackgroundPoller,
    overlay: OverlayCoordinator,
    center: Arc<LocalNotificationCenter>,
    controller: Arc<RepetitionController>,
    planner: RepeatPlanner,
    markers: MarkerStore,
    settings: SettingsStore,
    shutdown: CancellationToken,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AlarmEngine {
    pub async fn open(
        db: Database,
        settings: SettingsStore,
        audio: Arc<dyn AlarmAudio>,
        markers: MarkerStore,
        debug: bool,
    ) -> Result<Self> {
        let snapshot = settings.snapshot();
        let registry = Arc::new(AlarmRegistry::load(db).await?);
        let overlay = OverlayCoordinator::new();
        let poller = BackgroundPoller::new(
            registry.clone(),
            audio,
            overlay.clone(),
            snapshot.poll.to_config(debug),
        );

        let center = Arc::new(LocalNotificationCenter::new());
        let controller = Arc::new(RepetitionController::new(
            center.clone(),
            markers.clone(),
            snapshot.notification.query_timeout(),
        ));
        let planner = RepeatPlanner::new(
            snapshot.notification.total_repeats,
            snapshot.notification.repeat_spacing(),
        );

        Ok(Self {
            registry,
            poller,
            overlay,
            center,
            controller,
            planner,
            markers,
            settings,
            shutdown: CancellationToken::new(),
            pump: tokio::sync::Mutex::new(None),
        })
    }

    /// Consumes any dismissal marker, plans repeats and starts the timers.
    pub async fn start(&self) -> Result<()> {
        if let Some(id) = self.apply_dismissal_marker(Utc::now()).await? {
            info!("Disabled alarm {id} after early dismissal");
        }
        for alarm in self.registry.list_enabled_alarms() {
            self.schedule_repeats(&alarm).await;
        }

        self.poller.start().await;

        let mut pump = self.pump.lock().await;
        if pump.is_none() {
            let interval = self.settings.snapshot().notification.pump_interval();
            let delivery = DeliveryPump::new(self.center.clone(), self.controller.clone(), interval);
            *pump = Some(delivery.spawn(self.shutdown.child_token()));
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.poller.shutdown().await;
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.registry.list()
    }

    pub fn overlay(&self) -> &OverlayCoordinator {
        &self.overlay
    }

    pub fn poller(&self) -> &BackgroundPoller {
        &self.poller
    }

    pub fn notifications(&self) -> &Arc<LocalNotificationCenter> {
        &self.center
    }

    pub async fn add_alarm(&self, alarm: Alarm) -> Result<Alarm> {
        let alarm = self.registry.add(alarm).await?;
        self.schedule_repeats(&alarm).await;
        Ok(alarm)
    }

    pub async fn update_alarm(&self, alarm: Alarm) -> Result<Alarm> {
        let alarm = self.registry.update(alarm).await?;
        self.schedule_repeats(&alarm).await;
        Ok(alarm)
    }

    pub async fn set_enabled(&self, id: AlarmId, enabled: bool) -> Result<()> {
        self.registry.set_enabled(id, enabled).await?;
        if !enabled {
            self.poller.cancel_snooze(id).await;
        }
        match self.registry.alarm(&id) {
            Some(alarm) => self.schedule_repeats(&alarm).await,
            None => {
                self.center.remove_pending_for(id);
            }
        }
        Ok(())
    }

    pub async fn remove_alarm(&self, id: AlarmId) -> Result<Option<Alarm>> {
        let removed = self.registry.remove(id).await?;
        self.poller.cancel_snooze(id).await;
        self.center.remove_pending_for(id);
        Ok(removed)
    }

    /// Stops the ringing alarm. One-shot alarms are disabled afterwards,
    /// recurring ones get repeats for their next occurrence.
    pub async fn dismiss(&self) -> Result<Option<RingingSession>> {
        let Some(session) = self.poller.dismiss().await else {
            return Ok(None);
        };
        let id = session.alarm.id;
        self.center.remove_pending_for(id);

        let Some(alarm) = self.registry.alarm(&id) else {
            return Ok(Some(session));
        };
        if alarm.is_one_shot() {
            if alarm.enabled {
                self.registry.set_enabled(id, false).await?;
            }
        } else {
            self.schedule_repeats(&alarm).await;
        }
        Ok(Some(session))
    }

    pub async fn snooze(&self) -> Result<Option<Snooze>> {
        let Some(snooze) = self.poller.snooze(Utc::now()).await else {
            return Ok(None);
        };
        self.center.remove_pending_for(snooze.alarm_id);
        if let Some(alarm) = self.registry.alarm(&snooze.alarm_id) {
            self.plan_repeats(&alarm, snooze.due).await;
        }
        Ok(Some(snooze))
    }

    pub async fn start_countdown(&self, id: AlarmId) -> Result<()> {
        self.poller.start_countdown(id, Utc::now()).await?;
        self.schedule_countdown_repeats(id).await;
        Ok(())
    }

    pub async fn pause_countdown(&self, id: AlarmId) -> Result<()> {
        self.poller.pause_countdown(id, Utc::now()).await?;
        self.center.remove_pending_for(id);
        Ok(())
    }

    pub async fn resume_countdown(&self, id: AlarmId) -> Result<()> {
        self.poller.resume_countdown(id, Utc::now()).await?;
        self.schedule_countdown_repeats(id).await;
        Ok(())
    }

    /// Acts on a marker left by the repetition controller. Returns the alarm
    /// that was disabled, if any.
    pub async fn apply_dismissal_marker(&self, now: DateTime<Utc>) -> Result<Option<AlarmId>> {
        let Some(marker) = self.markers.read() else {
            return Ok(None);
        };
        let max_age = self.settings.snapshot().notification.marker_max_age();
        if now - marker.last_activity > max_age {
            info!(
                "Ignoring stale dismissal marker from {}",
                marker.last_activity.to_rfc3339()
            );
            return Ok(None);
        }
        if let Some(consumed) = self.settings.last_consumed_marker() {
            if marker.last_activity <= consumed {
                return Ok(None);
            }
        }
        self.settings.set_last_consumed_marker(marker.last_activity)?;

        let id = marker.cancelled_alarm_id;
        let Some(alarm) = self.registry.alarm(&id) else {
            warn!("Dismissal marker references unknown alarm {id}");
            return Ok(None);
        };
        if !alarm.is_one_shot() {
            info!("Alarm {id} repeats; leaving it enabled after early dismissal");
            return Ok(None);
        }
        if alarm.enabled {
            self.registry.set_enabled(id, false).await?;
        }
        self.center.remove_pending_for(id);
        Ok(Some(id))
    }

    /// Replaces the alarm's pending repeats with a series for its next occurrence.
    async fn schedule_repeats(&self, alarm: &Alarm) {
        self.center.remove_pending_for(alarm.id);
        if !alarm.enabled || alarm.schedule.is_none() {
            return;
        }
        let machine = AlarmStateMachine::new(alarm);
        if let Some(fire_at) = machine.effective_fire_date(&Local::now()) {
            self.plan_repeats(alarm, fire_at.with_timezone(&Utc)).await;
        }
    }

    async fn schedule_countdown_repeats(&self, id: AlarmId) {
        self.center.remove_pending_for(id);
        let (Some(alarm), Some(machine)) = (self.registry.alarm(&id), self.poller.machine(&id).await)
        else {
            return;
        };
        let now = Utc::now();
        // A countdown alarm with a schedule would report its wall-clock time.
        let fire_at = match machine.kind() {
            crate::models::AlarmKind::Timer => machine.effective_fire_date(&now),
            _ => None,
        };
        if let Some(fire_at) = fire_at {
            self.plan_repeats(&alarm, fire_at).await;
        }
    }

    async fn plan_repeats(&self, alarm: &Alarm, fire_at: DateTime<Utc>) {
        for request in self.planner.plan(alarm, fire_at) {
            if let Err(e) = self.center.add(request).await {
                warn!("Failed to queue repeat for {}: {e:#}", alarm.id);
            }
        }
    }
}
