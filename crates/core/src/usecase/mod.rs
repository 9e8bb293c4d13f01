pub mod coalescer;
pub mod coordinator;
pub mod dashboard;
pub mod fallback;
pub mod poll_scheduler;
pub mod push_manager;
pub mod sync_session;
