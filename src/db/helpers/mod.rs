use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::models::AlarmId;

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_alarm_id(value: &str) -> Result<AlarmId> {
    value
        .parse()
        .with_context(|| format!("invalid alarm id {value}"))
}

/// Nested values (schedule, countdown) are stored as JSON text columns.
pub fn to_json_column<T: Serialize>(value: Option<&T>, field: &str) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).with_context(|| format!("failed to encode {field}")))
        .transpose()
}

pub fn from_json_column<T: DeserializeOwned>(value: Option<String>, field: &str) -> Result<Option<T>> {
    value
        .map(|raw| serde_json::from_str(&raw).with_context(|| format!("failed to decode {field}")))
        .transpose()
}
