pub mod config;
pub mod engine;
pub mod progress;
pub mod provider_manager;
pub mod routes;
pub mod scheduler;

pub use config::RaceConfig;
pub use engine::{RaceEngine, RaceError};
