//! Configuration and logging

pub mod config;
pub mod logging;

pub use config::{ConfigurationManager, CoreConfig};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
