pub mod backends;
pub mod config;
pub mod errors;
pub mod monitoring;
pub mod scheduler;
pub mod session;
