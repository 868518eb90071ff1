use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::Alarm;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum OverlayEvent {
    Ringing { alarm: Alarm },
    Dismissed { alarm: Alarm },
    Snoozed { alarm: Alarm, until: DateTime<Utc> },
}

/// Hand-off point to whatever draws the ringing screen. Holds which alarm is
/// on screen and publishes changes; it never decides when anything rings.
#[derive(Clone)]
pub struct OverlayCoordinator {
    current: Arc<Mutex<Option<Alarm>>>,
    events: broadcast::Sender<OverlayEvent>,
}

impl OverlayCoordinator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            current: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Option<Alarm> {
        self.lock().clone()
    }

    pub fn show_ringing(&self, alarm: &Alarm) {
        *self.lock() = Some(alarm.clone());
        self.publish(OverlayEvent::Ringing {
            alarm: alarm.clone(),
        });
    }

    pub fn dismiss(&self) {
        if let Some(alarm) = self.lock().take() {
            self.publish(OverlayEvent::Dismissed { alarm });
        }
    }

    pub fn snooze(&self, until: DateTime<Utc>) {
        if let Some(alarm) = self.lock().take() {
            self.publish(OverlayEvent::Snoozed { alarm, until });
        }
    }

    fn publish(&self, event: OverlayEvent) {
        // No subscribers is fine; the daemon may run headless.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Alarm>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for OverlayCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_then_dismiss_publishes_once() {
        let overlay = OverlayCoordinator::new();
        let mut rx = overlay.subscribe();
        let alarm = Alarm::weekly("Morning", 7, 0, Vec::new());

        overlay.show_ringing(&alarm);
        assert_eq!(overlay.current().map(|a| a.id), Some(alarm.id));

        overlay.dismiss();
        overlay.dismiss();
        assert!(overlay.current().is_none());

        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::Ringing { .. })));
        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::Dismissed { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn snooze_carries_the_due_time() {
        let overlay = OverlayCoordinator::new();
        let mut rx = overlay.subscribe();
        let alarm = Alarm::weekly("Morning", 7, 0, Vec::new());
        let until = Utc::now();

        overlay.show_ringing(&alarm);
        overlay.snooze(until);

        let _ = rx.try_recv();
        match rx.try_recv() {
            Ok(OverlayEvent::Snoozed { alarm: a, until: u }) => {
                assert_eq!(a.id, alarm.id);
                assert_eq!(u, until);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
