use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::prelude::{DEFAULT_PROXY_PORT, DEFAULT_SERVER_PORT};

/// Command-line surface of the proxy binary.
#[derive(Parser, Debug)]
#[command(name = "proxy_cache", version, about = "Caching HTTP proxy with a management interface")]
pub struct Args {
    /// Bind address for both listening ports
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Proxy bind port
    #[arg(long, default_value_t = DEFAULT_PROXY_PORT)]
    pub proxy_bind_port: u16,

    /// Management server bind port
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    pub server_bind_port: u16,

    /// Base directory to search files in
    #[arg(long, default_value = ".")]
    pub base: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "INFO")]
    pub log_level: LogLevel,

    /// Logfile to write to
    #[arg(long, value_name = "FILE", default_value = "/dev/null")]
    pub log_file: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive for the tracing subscriber's env-filter.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            // tracing has no level above ERROR
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = Args::parse_from(["proxy_cache"]);
        assert_eq!(args.bind_address, "0.0.0.0");
        assert_eq!(args.proxy_bind_port, 8080);
        assert_eq!(args.server_bind_port, 9090);
        assert_eq!(args.base, PathBuf::from("."));
        assert_eq!(args.log_level, LogLevel::Info);
        assert_eq!(args.log_file, PathBuf::from("/dev/null"));
    }

    #[test]
    fn log_level_spells_uppercase() {
        let args = Args::parse_from(["proxy_cache", "--log-level", "DEBUG"]);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert!(Args::try_parse_from(["proxy_cache", "--log-level", "debug"]).is_err());
    }

    #[test]
    fn ports_are_overridable() {
        let args = Args::parse_from([
            "proxy_cache",
            "--proxy-bind-port",
            "1234",
            "--server-bind-port",
            "5678",
        ]);
        assert_eq!(args.proxy_bind_port, 1234);
        assert_eq!(args.server_bind_port, 5678);
    }
}
