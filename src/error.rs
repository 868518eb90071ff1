use std::time::Duration;

use thiserror::Error;

/// Failures the engine recovers from locally. None of these should ever
/// escape as a crash; callers log them and fall back to a safe default.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("unrecognized time string '{0}'")]
    ParseFailure(String),

    #[error("no playable resource for sound '{0}'")]
    AudioResourceMissing(String),

    #[error("audio output unavailable: {0}")]
    AudioSessionFailure(String),

    #[error("pending notification query exceeded {0:?}")]
    NotificationQueryTimeout(Duration),

    #[error("failed to persist dismissal marker: {0}")]
    PersistenceWriteFailure(String),
}
