use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Alarm, AlarmId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    pub body: String,
    pub sound_id: Option<String>,
    /// Set on the last notification the user will see for an occurrence.
    #[serde(default)]
    pub is_final: bool,
}

impl NotificationContent {
    pub fn for_alarm(alarm: &Alarm) -> Self {
        let title = if alarm.label.trim().is_empty() {
            "Alarm".to_string()
        } else {
            alarm.label.clone()
        };
        let (subtitle, body) = if alarm.display_time.trim().is_empty() {
            ("Timer".to_string(), "Time's up".to_string())
        } else {
            (alarm.display_time.clone(), "Time to wake up".to_string())
        };
        Self {
            title,
            subtitle,
            body,
            sound_id: Some(alarm.sound_id.clone()),
            is_final: false,
        }
    }

    /// The terminal "final wake-up" variant shown once repeats are cut short.
    pub fn into_final(self) -> Self {
        Self {
            title: "Final wake-up".to_string(),
            subtitle: self.title,
            body: "No more repeats will ring".to_string(),
            sound_id: self.sound_id,
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub identifier: String,
    pub content: NotificationContent,
    pub trigger_at: DateTime<Utc>,
    pub alarm_id: AlarmId,
    pub repetition: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredNotification {
    pub identifier: String,
    pub alarm_id: AlarmId,
    pub content: NotificationContent,
    pub delivered_at: DateTime<Utc>,
}

/// The slice of a platform notification center the engine relies on.
#[async_trait]
pub trait NotificationCenter: Send + Sync {
    async fn add(&self, request: NotificationRequest) -> Result<()>;
    async fn pending_requests(&self) -> Vec<NotificationRequest>;
    async fn delivered_identifiers(&self) -> Vec<String>;
    async fn remove_pending(&self, identifiers: &[String]);
    async fn remove_delivered(&self, identifiers: &[String]);
}

#[derive(Default)]
struct CenterInner {
    pending: Vec<NotificationRequest>,
    delivered: Vec<DeliveredNotification>,
}

/// In-process notification center. Requests wait in `pending` until the
/// delivery pump takes them.
#[derive(Default)]
pub struct LocalNotificationCenter {
    inner: Mutex<CenterInner>,
}

impl LocalNotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CenterInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Removes and returns the earliest due request of each alarm not in
    /// `busy`. Later repeats stay pending so they still count for the
    /// repetition check of the one taken.
    pub fn take_due(
        &self,
        now: DateTime<Utc>,
        busy: &HashSet<AlarmId>,
    ) -> Vec<NotificationRequest> {
        let mut inner = self.lock();
        let mut due: Vec<NotificationRequest> = Vec::new();
        for request in inner.pending.iter() {
            if request.trigger_at > now || busy.contains(&request.alarm_id) {
                continue;
            }
            match due.iter_mut().find(|d| d.alarm_id == request.alarm_id) {
                Some(current) => {
                    if (request.trigger_at, request.repetition)
                        < (current.trigger_at, current.repetition)
                    {
                        *current = request.clone();
                    }
                }
                None => due.push(request.clone()),
            }
        }
        inner
            .pending
            .retain(|request| !due.iter().any(|d| d.identifier == request.identifier));
        due.sort_by(|a, b| a.trigger_at.cmp(&b.trigger_at).then(a.repetition.cmp(&b.repetition)));
        due
    }

    pub fn mark_delivered(
        &self,
        request: &NotificationRequest,
        content: NotificationContent,
        delivered_at: DateTime<Utc>,
    ) {
        self.lock().delivered.push(DeliveredNotification {
            identifier: request.identifier.clone(),
            alarm_id: request.alarm_id,
            content,
            delivered_at,
        });
    }

    pub fn delivered(&self) -> Vec<DeliveredNotification> {
        self.lock().delivered.clone()
    }

    /// Drops every pending request for the alarm. Returns how many were removed.
    pub fn remove_pending_for(&self, alarm_id: AlarmId) -> usize {
        let mut inner = self.lock();
        let before = inner.pending.len();
        inner.pending.retain(|request| request.alarm_id != alarm_id);
        before - inner.pending.len()
    }
}

#[async_trait]
impl NotificationCenter for LocalNotificationCenter {
    async fn add(&self, request: NotificationRequest) -> Result<()> {
        let mut inner = self.lock();
        inner
            .pending
            .retain(|existing| existing.identifier != request.identifier);
        inner.pending.push(request);
        Ok(())
    }

    async fn pending_requests(&self) -> Vec<NotificationRequest> {
        self.lock().pending.clone()
    }

    async fn delivered_identifiers(&self) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .map(|d| d.identifier.clone())
            .collect()
    }

    async fn remove_pending(&self, identifiers: &[String]) {
        self.lock()
            .pending
            .retain(|request| !identifiers.contains(&request.identifier));
    }

    async fn remove_delivered(&self, identifiers: &[String]) {
        self.lock()
            .delivered
            .retain(|delivered| !identifiers.contains(&delivered.identifier));
    }
}
