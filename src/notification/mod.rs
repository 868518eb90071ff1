//! Repeat notifications: planning a series, delivering it, and cutting it
//! short once the user has reacted.

pub mod center;
pub mod controller;
pub mod delivery;
pub mod identifiers;
pub mod marker;
pub mod planner;

pub use center::{
    DeliveredNotification, LocalNotificationCenter, NotificationCenter, NotificationContent,
    NotificationRequest,
};
pub use controller::RepetitionController;
pub use delivery::DeliveryPump;
pub use identifiers::RepeatIdentifier;
pub use marker::{DismissalMarker, MarkerStore};
pub use planner::RepeatPlanner;
