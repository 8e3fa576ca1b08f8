//! Server Configuration
//!
//! Settings come from defaults overridden by command-line flags.

use crate::pubsub::DEFAULT_QUEUE_CAPACITY;
use crate::storage::ExpiryConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Pending pub/sub pushes buffered per client
    pub queue_capacity: usize,
    /// Poll interval for absolute (`EXAT`/`PXAT`) deadlines
    pub expiry_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            expiry_poll_interval: ExpiryConfig::default().poll_interval,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help,
    Version,
}

impl Config {
    /// Parses command-line arguments, program name excluded.
    pub fn from_args<I, S>(args: I) -> Result<Invocation, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = args.next().ok_or(ConfigError::MissingValue(arg))?;
                }
                "--port" | "-p" => {
                    let value = args.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
                    config.port = parse_value(&arg, value)?;
                }
                "--queue-capacity" => {
                    let value = args.next().ok_or_else(|| ConfigError::MissingValue(arg.clone()))?;
                    let capacity: usize = parse_value(&arg, value.clone())?;
                    if capacity == 0 {
                        return Err(ConfigError::InvalidValue { flag: arg, value });
                    }
                    config.queue_capacity = capacity;
                }
                "--help" => return Ok(Invocation::Help),
                "--version" | "-v" => return Ok(Invocation::Version),
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(Invocation::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            poll_interval: self.expiry_poll_interval,
        }
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

pub fn help_text() -> String {
    format!(
        r#"
sider {} - In-Memory Key-Value Server with Pub/Sub

USAGE:
    sider [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: {})
    -p, --port <PORT>            Port to listen on (default: {})
        --queue-capacity <N>     Pending pushes per subscriber (default: {})
    -v, --version                Print version information
        --help                   Print this help message

Logging is controlled with RUST_LOG (default: info).
"#,
        crate::VERSION,
        DEFAULT_HOST,
        DEFAULT_PORT,
        DEFAULT_QUEUE_CAPACITY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> Config {
        match Config::from_args(args.iter().copied()).unwrap() {
            Invocation::Run(config) => config,
            other => panic!("expected a run, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.expiry().poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_host_and_port() {
        let config = run(&["--host", "0.0.0.0", "-p", "6380"]);
        assert_eq!(config.bind_address(), "0.0.0.0:6380");

        let config = run(&["-h", "localhost", "--port", "7000", "--queue-capacity", "4"]);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 7000);
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(Config::from_args(["--help"]).unwrap(), Invocation::Help);
        assert_eq!(Config::from_args(["-v"]).unwrap(), Invocation::Version);
        assert!(help_text().contains("--queue-capacity"));
    }

    #[test]
    fn test_invalid_arguments() {
        assert_eq!(
            Config::from_args(["--port"]).unwrap_err(),
            ConfigError::MissingValue("--port".to_string())
        );
        assert_eq!(
            Config::from_args(["--port", "70000"]).unwrap_err(),
            ConfigError::InvalidValue {
                flag: "--port".to_string(),
                value: "70000".to_string(),
            }
        );
        assert!(matches!(
            Config::from_args(["--queue-capacity", "0"]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert_eq!(
            Config::from_args(["--verbose"]).unwrap_err(),
            ConfigError::UnknownArgument("--verbose".to_string())
        );
    }
}
