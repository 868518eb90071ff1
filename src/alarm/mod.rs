pub mod machine;
pub mod state;
pub mod time_parse;

pub use machine::{AlarmProjection, AlarmStateMachine};
pub use state::{AlarmState, Phase, PresentationState};
pub use time_parse::parse_display_time;
