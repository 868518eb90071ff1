use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::Alarm;

use super::center::{NotificationContent, NotificationRequest};
use super::identifiers::RepeatIdentifier;

/// Lays out the fixed series of repeat notifications for one occurrence.
#[derive(Debug, Clone)]
pub struct RepeatPlanner {
    total: u32,
    spacing: Duration,
}

impl RepeatPlanner {
    pub fn new(total: u32, spacing: Duration) -> Self {
        Self { total, spacing }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn plan(&self, alarm: &Alarm, fire_at: DateTime<Utc>) -> Vec<NotificationRequest> {
        let content = NotificationContent::for_alarm(alarm);
        let spacing = chrono::Duration::from_std(self.spacing)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        (0..self.total)
            .map(|index| NotificationRequest {
                identifier: RepeatIdentifier::new(alarm.id, index).to_string(),
                content: content.clone(),
                trigger_at: fire_at + spacing * index as i32,
                alarm_id: alarm.id,
                repetition: index,
                total: self.total,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn repeats_are_spaced_and_indexed() {
        let alarm = Alarm::weekly("Morning", 7, 30, Vec::new());
        let fire_at = Utc.with_ymd_and_hms(2024, 3, 4, 7, 30, 0).unwrap();
        let requests = RepeatPlanner::new(6, Duration::from_secs(60)).plan(&alarm, fire_at);

        assert_eq!(requests.len(), 6);
        assert_eq!(requests[0].trigger_at, fire_at);
        assert_eq!(
            requests[5].trigger_at,
            Utc.with_ymd_and_hms(2024, 3, 4, 7, 35, 0).unwrap()
        );
        for (index, request) in requests.iter().enumerate() {
            let id = RepeatIdentifier::parse(&request.identifier).unwrap();
            assert_eq!(id.alarm_id, alarm.id);
            assert_eq!(id.index, index as u32);
            assert_eq!(request.total, 6);
            assert!(!request.content.is_final);
        }
    }
}
