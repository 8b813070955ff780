//! Client configuration: CLI flags plus the environment variables used for
//! server/SSH connection details. `--path`/`-p` is required, `--extra`/`-E`
//! takes any number of additional sync paths, `--env`/`-e` and `--args`/`-a`
//! are single shell-quoted strings.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

/// Command-line surface for `psync-client`.
#[derive(Debug, Parser)]
#[clap(name = "psync-client", author, version, about)]
pub struct Cli {
    /// Path to the target executable to sync and run.
    #[clap(short = 'p', long = "path")]
    pub path: PathBuf,

    /// Extra files or directories to sync alongside the target.
    #[clap(short = 'E', long = "extra", num_args = 1..)]
    pub extra: Vec<String>,

    /// Environment variables for the remote execution, space-separated
    /// `NAME=VALUE` pairs (double-quote a value containing spaces).
    #[clap(short = 'e', long = "env", default_value = "")]
    pub env: String,

    /// Arguments for the remote executable, shell-quoted.
    #[clap(short = 'a', long = "args", default_value = "")]
    pub args: String,

    #[clap(flatten)]
    pub logging: LoggingSettings,
}

impl Cli {
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Mirrors `psync-server`'s logging flag shape: a single `--log-level` plus
/// `-v`/`-q` shortcuts.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    #[clap(long, value_enum)]
    pub log_level: Option<LogLevel>,

    #[clap(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

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

/// Connection and sync settings read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    pub server_ip: String,
    pub server_port: u16,
    pub ssh_port: u16,
    pub server_dest: String,
    pub ssh_args: String,
    pub cert_path: Option<PathBuf>,
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let cert_path = env_or("PSYNC_CERT_PATH", "~/.local/share/psync/cert.pem");
        Self {
            server_ip: env_or("PSYNC_SERVER_IP", "127.0.0.1"),
            server_port: env_or("PSYNC_SERVER_PORT", "5000").parse().unwrap_or(5000),
            ssh_port: env_or("PSYNC_SSH_PORT", "5022").parse().unwrap_or(5022),
            server_dest: env_or("PSYNC_SERVER_DEST", "/home/psync"),
            ssh_args: env_or("PSYNC_SSH_ARGS", "-l psync"),
            cert_path: expand_home(&cert_path),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn expand_home(path: &str) -> Option<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest))
    } else {
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_quiet_wins_over_verbose() {
        let settings = LoggingSettings {
            log_level: None,
            verbose: 3,
            quiet: true,
        };
        assert_eq!(settings.resolve(), LogLevel::Off);
    }

    #[test]
    fn server_settings_fall_back_to_documented_defaults() {
        std::env::remove_var("PSYNC_SERVER_IP");
        std::env::remove_var("PSYNC_SERVER_PORT");
        let settings = ServerSettings::from_env();
        assert_eq!(settings.server_ip, "127.0.0.1");
        assert_eq!(settings.server_port, 5000);
    }
}
