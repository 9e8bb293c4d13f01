pub mod api;
pub mod config;
pub mod credentials;
pub mod metrics;
pub mod output;
pub mod realtime;
pub mod timer;
