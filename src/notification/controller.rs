use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::time::{self, Instant};

use crate::error::AlarmError;
use crate::models::AlarmId;

use super::center::{NotificationCenter, NotificationContent, NotificationRequest};
use super::identifiers::RepeatIdentifier;
use super::marker::{DismissalMarker, MarkerStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Runs once per delivered repeat. It sees only the notification center and
/// the marker store, never the engine's alarm state.
pub struct RepetitionController {
    center: Arc<dyn NotificationCenter>,
    markers: MarkerStore,
    query_timeout: Duration,
}

impl RepetitionController {
    pub fn new(
        center: Arc<dyn NotificationCenter>,
        markers: MarkerStore,
        query_timeout: Duration,
    ) -> Self {
        Self {
            center,
            markers,
            query_timeout,
        }
    }

    /// Decides what the repeat at `request.repetition` should show. If fewer
    /// later repeats are pending than expected, the user already reacted: the
    /// rest are cancelled and the final wake-up content is returned.
    pub async fn did_receive(
        &self,
        request: NotificationRequest,
        now: DateTime<Utc>,
    ) -> NotificationContent {
        let deadline = Instant::now() + self.query_timeout;

        let actual = match time::timeout_at(deadline, self.pending_repeats(request.alarm_id)).await
        {
            Ok(count) => count,
            Err(_) => {
                warn!(
                    "{}; delivering repeat {} unchanged",
                    AlarmError::NotificationQueryTimeout(self.query_timeout),
                    request.identifier
                );
                return request.content;
            }
        };

        let expected = request
            .total
            .saturating_sub(request.repetition.saturating_add(1)) as usize;
        if actual >= expected {
            log_debug!(
                "repeat {}/{} for {}: {actual} pending, nothing to cancel",
                request.repetition,
                request.total,
                request.alarm_id
            );
            return request.content;
        }

        log_info!(
            "repeat {}/{} for {}: {actual} pending, expected {expected}; cutting short",
            request.repetition,
            request.total,
            request.alarm_id
        );
        let content = request.content.clone().into_final();
        if time::timeout_at(deadline, self.cancel_remaining(&request, now))
            .await
            .is_err()
        {
            warn!(
                "Cancelling remaining repeats for {} overran the deadline",
                request.alarm_id
            );
        }
        content
    }

    async fn pending_repeats(&self, alarm_id: AlarmId) -> usize {
        self.center
            .pending_requests()
            .await
            .iter()
            .filter_map(|r| RepeatIdentifier::parse(&r.identifier))
            .filter(|id| id.alarm_id == alarm_id)
            .count()
    }

    async fn cancel_remaining(&self, request: &NotificationRequest, now: DateTime<Utc>) {
        let identifiers: Vec<String> = (request.repetition.saturating_add(1)..request.total)
            .map(|index| RepeatIdentifier::new(request.alarm_id, index).to_string())
            .collect();
        self.center.remove_pending(&identifiers).await;
        let visible: Vec<String> = self
            .center
            .delivered_identifiers()
            .await
            .into_iter()
            .filter(|id| identifiers.contains(id))
            .collect();
        if !visible.is_empty() {
            self.center.remove_delivered(&visible).await;
        }

        let marker = DismissalMarker {
            last_activity: now,
            cancelled_alarm_id: request.alarm_id,
        };
        if let Err(e) = self.markers.write(&marker) {
            warn!("{e}");
        }
    }
}
