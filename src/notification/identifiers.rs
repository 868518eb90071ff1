use std::fmt;

use crate::models::AlarmId;

const REPEAT_PREFIX: &str = "dawnbell.repeat.";

/// Identifier of one repeat notification: `dawnbell.repeat.<alarm-id>.<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatIdentifier {
    pub alarm_id: AlarmId,
    pub index: u32,
}

impl RepeatIdentifier {
    pub fn new(alarm_id: AlarmId, index: u32) -> Self {
        Self { alarm_id, index }
    }

    /// Returns `None` for identifiers that were not minted by the repeat planner.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(REPEAT_PREFIX)?;
        let (alarm_id, index) = rest.rsplit_once('.')?;
        Some(Self {
            alarm_id: alarm_id.parse().ok()?,
            index: index.parse().ok()?,
        })
    }
}

impl fmt::Display for RepeatIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REPEAT_PREFIX}{}.{}", self.alarm_id, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses() {
        let id = RepeatIdentifier::new(AlarmId::new(), 4);
        let raw = id.to_string();
        assert!(raw.starts_with("dawnbell.repeat."));
        assert!(raw.ends_with(".4"));
        assert_eq!(RepeatIdentifier::parse(&raw), Some(id));
    }

    #[test]
    fn foreign_identifiers_are_rejected() {
        assert_eq!(RepeatIdentifier::parse("calendar.reminder.1"), None);
        assert_eq!(RepeatIdentifier::parse("dawnbell.repeat.not-a-uuid.1"), None);
        let missing_index = format!("dawnbell.repeat.{}", AlarmId::new());
        assert_eq!(RepeatIdentifier::parse(&missing_index), None);
    }
}
