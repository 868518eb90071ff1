pub mod poller;

pub use poller::{BackgroundPoller, FireTrigger, PollerConfig, RingingSession, Snooze};
