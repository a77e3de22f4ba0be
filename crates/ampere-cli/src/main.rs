//! Ampere CLI
//!
//! Command-line interface for Ampere: run a server, connect a headless
//! client, and work with signed tokens and configuration.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use ampere_core::{Config, TokenPurpose};

mod commands;
mod output;

use commands::connect::ConnectOptions;
use commands::serve::ServeOptions;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "ampere")]
#[command(about = "Ampere - server-pushed instructions over WebSocket")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server
    Serve {
        /// Address to bind (overrides bind_addr)
        #[arg(long)]
        bind: Option<String>,
        /// Expression to evaluate on each client after it attaches
        #[arg(long)]
        eval: Option<String>,
        /// Call timeout in milliseconds (overrides call_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Connect to a server as a headless client
    Connect {
        /// Server URL, e.g. ws://127.0.0.1:8765
        url: String,
        /// Page route to attach with
        #[arg(long, default_value = "/")]
        page: String,
        /// HTML file to load as the initial document
        #[arg(long)]
        html: Option<PathBuf>,
        /// Use binary CBOR frames instead of JSON text
        #[arg(long)]
        cbor: bool,
        /// Do not persist the store token
        #[arg(long)]
        ephemeral: bool,
    },
    /// Sign, verify and inspect tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Sign a JSON object
    Sign {
        /// JSON object to sign
        payload: String,
        #[arg(long, value_enum, default_value_t = PurposeArg::Store)]
        purpose: PurposeArg,
    },
    /// Verify a token and print its payload
    Verify {
        token: String,
        #[arg(long, value_enum, default_value_t = PurposeArg::Store)]
        purpose: PurposeArg,
    },
    /// Print a token's payload without verifying it
    Inspect { token: String },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (bind_addr, call_timeout_ms, secret_key, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

/// Token purpose on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PurposeArg {
    Store,
    Session,
}

impl From<PurposeArg> for TokenPurpose {
    fn from(arg: PurposeArg) -> Self {
        match arg {
            PurposeArg::Store => TokenPurpose::Store,
            PurposeArg::Session => TokenPurpose::Session,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    init_logging(cli.log_level.as_deref(), config_path, &cli.command);

    match cli.command {
        Commands::Serve {
            bind,
            eval,
            timeout_ms,
        } => {
            let options = ServeOptions {
                bind,
                eval,
                timeout_ms,
            };
            commands::serve::run(options, config_path, &output).await
        }
        Commands::Connect {
            url,
            page,
            html,
            cbor,
            ephemeral,
        } => {
            let options = ConnectOptions {
                url,
                page,
                html,
                cbor,
                ephemeral,
            };
            commands::connect::run(options, config_path, &output).await
        }
        Commands::Token { command } => match command {
            TokenCommands::Sign { payload, purpose } => {
                commands::token::sign(purpose.into(), &payload, config_path, &output)
            }
            TokenCommands::Verify { token, purpose } => {
                commands::token::verify(purpose.into(), &token, config_path, &output)
            }
            TokenCommands::Inspect { token } => commands::token::inspect(&token, &output),
        },
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        },
    }
}

/// Initialize stderr logging
///
/// The flag wins over `log_level` in the config file. Long-running commands
/// default to `info`, one-shot commands to `warn`.
fn init_logging(flag: Option<&str>, config_path: Option<&PathBuf>, command: &Commands) {
    let configured = Config::load_with_cli_override(config_path)
        .ok()
        .and_then(|c| c.log_level);
    let default = match command {
        Commands::Serve { .. } | Commands::Connect { .. } => "info",
        _ => "warn",
    };
    let level = flag.map(str::to_string).or(configured).unwrap_or_else(|| default.to_string());

    let env_filter = EnvFilter::new(format!("ampere_core={},ampere_cli={}", level, level));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["ampere", "serve", "--eval", "2 + 2", "--timeout-ms", "250"]).unwrap();
        match cli.command {
            Commands::Serve {
                eval, timeout_ms, ..
            } => {
                assert_eq!(eval.as_deref(), Some("2 + 2"));
                assert_eq!(timeout_ms, Some(250));
            }
            _ => panic!("Expected serve"),
        }
    }

    #[test]
    fn test_parse_token_purpose() {
        let cli = Cli::try_parse_from(["ampere", "--json", "token", "verify", "abc.def", "--purpose", "session"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Token {
                command: TokenCommands::Verify { token, purpose },
            } => {
                assert_eq!(token, "abc.def");
                assert_eq!(TokenPurpose::from(purpose), TokenPurpose::Session);
            }
            _ => panic!("Expected token verify"),
        }
    }

    #[test]
    fn test_connect_defaults() {
        let cli = Cli::try_parse_from(["ampere", "connect", "ws://127.0.0.1:8765"]).unwrap();
        match cli.command {
            Commands::Connect { page, cbor, ephemeral, .. } => {
                assert_eq!(page, "/");
                assert!(!cbor);
                assert!(!ephemeral);
            }
            _ => panic!("Expected connect"),
        }
    }
}
