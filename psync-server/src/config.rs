use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

/// Server configuration, immutable once the server starts serving.
///
/// Built from environment variables (`ServerConfig::from_env`) with CLI
/// flags layered on top (`ServerConfig::from_env_and_cli`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_host: IpAddr,
    pub bind_port: u16,
    pub allowlist: Vec<String>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub target_user: Option<String>,
    pub inherit_base_env: bool,
}

impl ServerConfig {
    /// Reads the configuration from the environment.
    pub fn from_env() -> Self {
        let bind_host = env_or("PSYNC_SERVER_IP", "0.0.0.0")
            .parse()
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));

        let bind_port = env_or("PSYNC_SERVER_PORT", "5000")
            .parse()
            .unwrap_or(5000);

        let allowlist = env_or("PSYNC_ORIGINS", "localhost 127.0.0.1")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let cert_path = PathBuf::from(env_or("SSL_CERT_PATH", "./cert.pem"));
        let key_path = PathBuf::from(env_or("SSL_KEY_PATH", "./key.pem"));

        let target_user = std::env::var("PSYNC_USER").ok().filter(|s| !s.is_empty());

        ServerConfig {
            bind_host,
            bind_port,
            allowlist,
            cert_path,
            key_path,
            target_user,
            inherit_base_env: false,
        }
    }

    /// Layers CLI flags on top of the environment-derived configuration.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if cli.use_base_env {
            self.inherit_base_env = true;
        }
        self
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Command-line surface for `psync-server`. Only flags that aren't already
/// covered by an environment variable live here.
#[derive(Debug, Parser)]
#[clap(name = "psync-server", author, version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub logging: LoggingSettings,

    /// Merge the server process's own environment into each spawned child
    /// before overlaying the request's environment.
    #[clap(short = 'E', long = "use-base-env")]
    pub use_base_env: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Mirrors the flattened logging-flags shape used throughout this codebase's
/// sibling CLIs: a single `--log-level`, plus `-v`/`-q` shortcuts that nudge
/// it up or down without requiring the long form.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log level to use throughout the server.
    #[clap(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Increase verbosity by one step (repeatable).
    #[clap(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all logging output.
    #[clap(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl LoggingSettings {
    pub fn resolve(&self) -> LogLevel {
        if self.quiet {
            return LogLevel::Off;
        }
        if self.verbose > 0 {
            return match self.verbose {
                1 => LogLevel::Debug,
                _ => LogLevel::Trace,
            };
        }
        self.log_level.unwrap_or_else(|| {
            env_or("PSYNC_LOG", "INFO")
                .parse()
                .unwrap_or(LogLevel::Info)
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "UPPER")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "ERROR" => Ok(Self::Error),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "INFO" => Ok(Self::Info),
            "DEBUG" => Ok(Self::Debug),
            "TRACE" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Off => log::LevelFilter::Off,
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_splits_on_whitespace() {
        std::env::remove_var("PSYNC_ORIGINS");
        let config = ServerConfig::from_env();
        assert_eq!(config.allowlist, vec!["localhost", "127.0.0.1"]);
    }

    #[test]
    fn logging_quiet_wins_over_verbose() {
        let settings = LoggingSettings {
            log_level: None,
            verbose: 3,
            quiet: true,
        };
        assert_eq!(settings.resolve(), LogLevel::Off);
    }
}
