use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where the debugger listens and what it may do to the host process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port debuggers connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Honour `terminate` and `disconnect { terminateDebuggee }`.
    #[serde(default = "default_true")]
    pub allow_terminate: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4712
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_terminate: true,
        }
    }
}

impl BridgeConfig {
    /// `host:port` as accepted by `TcpListener::bind`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Event categories a debugger can toggle as exception-style breakpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Every category offered to the debugger.
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
    /// Categories that stop on breakpoints before the debugger says otherwise.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
}

fn default_filters() -> Vec<String> {
    vec!["begin".into(), "end".into(), "error".into()]
}

fn default_enabled() -> Vec<String> {
    vec!["begin".into(), "error".into()]
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            filters: default_filters(),
            enabled: default_enabled(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub level: LogLevel,
    /// Optional path to a log file.
    pub file: Option<PathBuf>,
}

/// Top-level turnstile configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bridge.host, "127.0.0.1");
        assert_eq!(cfg.bridge.port, 4712);
        assert!(cfg.bridge.allow_terminate);
        assert_eq!(cfg.events.filters, vec!["begin", "end", "error"]);
        assert_eq!(cfg.events.enabled, vec!["begin", "error"]);
        assert_eq!(cfg.log.level, LogLevel::Info);
        assert!(cfg.log.file.is_none());
    }

    #[test]
    fn bridge_address_joins_host_and_port() {
        let bridge = BridgeConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            allow_terminate: false,
        };
        assert_eq!(bridge.address(), "0.0.0.0:9000");
    }

    #[test]
    fn serde_roundtrip_preserves_values() {
        let cfg = Config {
            bridge: BridgeConfig {
                host: "localhost".into(),
                port: 5000,
                allow_terminate: false,
            },
            events: EventsConfig {
                filters: vec!["error".into()],
                enabled: vec![],
            },
            log: LogConfig {
                level: LogLevel::Debug,
                file: Some(PathBuf::from("/tmp/turnstile.log")),
            },
        };
        let toml_str = toml::to_string(&cfg).expect("serialize");
        let back: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let input = r#"
[bridge]
port = 6000

[log]
level = "trace"
"#;
        let cfg: Config = toml::from_str(input).expect("parse toml");
        assert_eq!(cfg.bridge.port, 6000);
        assert_eq!(cfg.bridge.host, "127.0.0.1");
        assert_eq!(cfg.log.level.as_filter(), "trace");
        assert_eq!(cfg.events, EventsConfig::default());
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").expect("parse empty toml");
        assert_eq!(cfg, Config::default());
    }
}
