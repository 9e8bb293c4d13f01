pub mod error;
pub mod job;
pub mod session;
pub mod settings;
pub mod site;
pub mod snapshot;
pub mod types;
