//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (run, validate, health), and their associated argument
//! structs. Every `run` flag has an environment variable equivalent for
//! container deployments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::server::ServerOptions;

#[derive(Parser)]
#[command(
    name = "livemock",
    version,
    about = "Mock HTTP service with templated, conditional and proxied endpoints",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        livemock run                          In-memory store with demo endpoints\n  \
        livemock run --store mocks.json       Persist definitions to a JSON file\n  \
        livemock validate mocks.json          Check definitions without starting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the mock server
    Run(Box<RunArgs>),

    /// Validate a JSON file of endpoint definitions without starting
    Validate(ValidateArgs),

    /// Check health of a running instance
    Health(HealthArgs),
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        livemock run -p 8080 --pretty                       Local dev mode\n  \
        livemock run --store livemock.db                    SQLite store\n  \
        livemock run --context-path /mock --no-seed         Empty table under /mock\n  \
        livemock run --basic-auth admin:secret              Protect the admin API")]
pub struct RunArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 5003)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Definition store (.json file, or .db/.sqlite database); in-memory when absent
    #[arg(short, long, env = "LIVEMOCK_STORE")]
    pub store: Option<PathBuf>,

    /// URL prefix for every user endpoint
    #[arg(long, env = "CONTEXT_PATH", default_value = "")]
    pub context_path: String,

    /// `user:pass` guarding the admin API
    #[arg(long, env = "LIVEMOCK_BASIC_AUTH", value_parser = parse_basic_auth)]
    pub basic_auth: Option<(String, String)>,

    /// Do not install the demo endpoints into an empty store
    #[arg(long)]
    pub no_seed: bool,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,

    // -- Tuning --
    /// Proxy and tee timeout in milliseconds
    #[arg(
        long,
        env = "PROXY_TIMEOUT_MS",
        default_value_t = 30_000,
        help_heading = "Tuning"
    )]
    pub proxy_timeout: u64,

    /// Max request body size in bytes
    #[arg(
        long,
        env = "MAX_BODY_SIZE",
        default_value_t = 10 * 1024 * 1024,
        help_heading = "Tuning"
    )]
    pub max_body: usize,

    /// Concurrent tee deliveries before new ones wait
    #[arg(long, env = "TEE_WORKERS", default_value_t = 20, help_heading = "Tuning")]
    pub tee_workers: usize,

    /// Request summaries broadcast per minute (0 disables)
    #[arg(
        long,
        env = "BROADCAST_PER_MINUTE",
        default_value_t = 60,
        help_heading = "Tuning"
    )]
    pub broadcast_per_minute: u32,
}

impl RunArgs {
    #[must_use]
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host.clone(),
            port: self.port,
            context_path: self.context_path.clone(),
            admin_auth: self.basic_auth.clone(),
            proxy_timeout: Duration::from_millis(self.proxy_timeout),
            max_body: self.max_body,
            tee_workers: self.tee_workers.max(1),
            broadcast_per_minute: self.broadcast_per_minute,
        }
    }
}

fn parse_basic_auth(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((user, pass)) if !user.is_empty() => Ok((user.to_string(), pass.to_string())),
        _ => Err("expected user:pass".to_string()),
    }
}

#[derive(Args)]
pub struct ValidateArgs {
    /// JSON array of endpoint definitions
    pub file: PathBuf,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: ValidateFormat,
}

#[derive(Args)]
pub struct HealthArgs {
    /// URL of the running instance
    #[arg(default_value = "http://localhost:5003")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum ValidateFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::parse_from(["livemock", "run"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let options = args.server_options();
        assert_eq!(options.port, 5003);
        assert_eq!(options.proxy_timeout, Duration::from_secs(30));
        assert_eq!(options.tee_workers, 20);
        assert!(options.admin_auth.is_none());
        assert!(!args.no_seed);
    }

    #[test]
    fn basic_auth_needs_a_user() {
        assert_eq!(
            parse_basic_auth("admin:s:ecret"),
            Ok(("admin".to_string(), "s:ecret".to_string()))
        );
        assert!(parse_basic_auth(":pw").is_err());
        assert!(parse_basic_auth("nocolon").is_err());
    }
}
