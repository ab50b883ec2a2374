//! Daemon configuration

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{AppConfig, CompatConfig, GeneralConfig, ShutdownConfig, TimeoutConfig};
