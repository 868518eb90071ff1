use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::models::AlarmId;

use super::center::LocalNotificationCenter;
use super::controller::RepetitionController;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

type InFlight = Arc<Mutex<HashSet<AlarmId>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<AlarmId>> {
    match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Clears an alarm's in-flight mark when its delivery task ends.
struct InFlightGuard {
    in_flight: InFlight,
    alarm_id: AlarmId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.alarm_id);
    }
}

/// Hands due repeat notifications to the repetition controller, each in its
/// own task so a slow query never holds up the next delivery. An alarm's next
/// repeat is not taken until the previous one has been decided.
#[derive(Clone)]
pub struct DeliveryPump {
    center: Arc<LocalNotificationCenter>,
    controller: Arc<RepetitionController>,
    interval: Duration,
    in_flight: InFlight,
}

impl DeliveryPump {
    pub fn new(
        center: Arc<LocalNotificationCenter>,
        controller: Arc<RepetitionController>,
        interval: Duration,
    ) -> Self {
        Self {
            center,
            controller,
            interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.deliver_due();
                    }
                    _ = token.cancelled() => {
                        log_debug!("delivery pump stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Starts one delivery per due request and returns their handles.
    pub fn deliver_due(&self) -> Vec<JoinHandle<()>> {
        let due = {
            let mut in_flight = lock(&self.in_flight);
            let due = self.center.take_due(Utc::now(), &in_flight);
            in_flight.extend(due.iter().map(|request| request.alarm_id));
            due
        };
        if !due.is_empty() {
            log_info!("delivering {} repeat notification(s)", due.len());
        }

        due.into_iter()
            .map(|request| {
                let center = self.center.clone();
                let controller = self.controller.clone();
                let guard = InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    alarm_id: request.alarm_id,
                };
                tokio::spawn(async move {
                    let _guard = guard;
                    let now = Utc::now();
                    let content = controller.did_receive(request.clone(), now).await;
                    log::info!(
                        "Notification {}: {} / {} ({})",
                        request.identifier,
                        content.title,
                        content.subtitle,
                        content.body
                    );
                    center.mark_delivered(&request, content, now);
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Alarm;
    use crate::notification::center::NotificationCenter;
    use crate::notification::marker::MarkerStore;
    use crate::notification::planner::RepeatPlanner;

    fn pump(dir: &tempfile::TempDir) -> (DeliveryPump, Arc<LocalNotificationCenter>) {
        let center = Arc::new(LocalNotificationCenter::new());
        let controller = Arc::new(RepetitionController::new(
            center.clone(),
            MarkerStore::new(dir.path().join("marker.json")),
            Duration::from_secs(3),
        ));
        (
            DeliveryPump::new(center.clone(), controller, Duration::from_secs(1)),
            center,
        )
    }

    #[tokio::test]
    async fn untouched_series_delivers_normally() {
        let dir = tempfile::tempdir().unwrap();
        let (pump, center) = pump(&dir);
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let fire_at = Utc::now() - chrono::Duration::seconds(1);
        for request in RepeatPlanner::new(6, Duration::from_secs(60)).plan(&alarm, fire_at) {
            center.add(request).await.unwrap();
        }

        for handle in pump.deliver_due() {
            handle.await.unwrap();
        }

        let delivered = center.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(!delivered[0].content.is_final);
        assert_eq!(center.pending_requests().await.len(), 5);
    }

    #[tokio::test]
    async fn series_cleared_elsewhere_goes_final() {
        let dir = tempfile::tempdir().unwrap();
        let (pump, center) = pump(&dir);
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let requests = RepeatPlanner::new(6, Duration::from_secs(60))
            .plan(&alarm, Utc::now() - chrono::Duration::seconds(1));
        center.add(requests[0].clone()).await.unwrap();
        center.add(requests[4].clone()).await.unwrap();

        for handle in pump.deliver_due() {
            handle.await.unwrap();
        }

        assert!(center.delivered()[0].content.is_final);
        assert!(center.pending_requests().await.is_empty());
        let marker = MarkerStore::new(dir.path().join("marker.json")).read().unwrap();
        assert_eq!(marker.cancelled_alarm_id, alarm.id);
    }

    #[tokio::test]
    async fn late_pump_does_not_mistake_backlog_for_dismissal() {
        let dir = tempfile::tempdir().unwrap();
        let (pump, center) = pump(&dir);
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let fire_at = Utc::now() - chrono::Duration::seconds(90);
        for request in RepeatPlanner::new(6, Duration::from_secs(60)).plan(&alarm, fire_at) {
            center.add(request).await.unwrap();
        }

        let first = pump.deliver_due();
        assert_eq!(first.len(), 1);
        // Still deciding repeat 0, so repeat 1 waits.
        assert!(pump.deliver_due().is_empty());
        for handle in first {
            handle.await.unwrap();
        }
        for handle in pump.deliver_due() {
            handle.await.unwrap();
        }
        assert!(pump.deliver_due().is_empty());

        let delivered = center.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|d| !d.content.is_final));
        assert_eq!(center.pending_requests().await.len(), 4);
        assert!(!dir.path().join("marker.json").exists());
    }
}
