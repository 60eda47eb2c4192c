pub mod attempt_store;
pub mod memory_store;
pub mod pg_store;
pub mod pool;
