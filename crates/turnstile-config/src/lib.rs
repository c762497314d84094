pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{BridgeConfig, Config, EventsConfig, LogConfig, LogLevel};
pub use error::ConfigError;
pub use load::{load_config, load_config_file, load_from_str};
