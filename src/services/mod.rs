pub mod attempt_service;
pub mod countdown_feed;
pub mod deadline;
pub mod notification_service;
pub mod session_tracker;
pub mod sweep_schedule;
pub mod sweeper;
pub mod ticker;
