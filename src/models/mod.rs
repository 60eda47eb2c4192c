pub mod test;
pub mod test_attempt;
pub mod notification_log;
