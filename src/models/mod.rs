pub mod alarm;

pub use alarm::{Alarm, AlarmId, AlarmKind, Countdown, Schedule, SleepContext, WakeReason};
