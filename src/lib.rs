// Core modules
pub mod bus;
pub mod calendar;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod models;
pub mod providers;
pub mod rate;

// Re-export commonly used types
pub use bus::Bus;
pub use error::{CoreError, Result};
pub use models::Envelope;
