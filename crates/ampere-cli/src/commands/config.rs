//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ampere_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
///
/// The secret key itself is never printed.
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "bind_addr": config.bind_addr,
                    "call_timeout_ms": config.call_timeout_ms,
                    "secret_key": config.secret_key.is_some(),
                    "secret_key_file": config.secret_key_file,
                    "session_whitelist": config.session_whitelist,
                    "max_connections": config.max_connections,
                    "data_dir": config.data_dir,
                    "log_level": config.log_level,
                    "session": config.session,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.bind_addr);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  bind_addr:         {}", config.bind_addr);
            println!("  call_timeout_ms:   {}", config.call_timeout_ms);
            println!(
                "  secret_key:        {}",
                if config.secret_key.is_some() { "(set)" } else { "(not set)" }
            );
            println!(
                "  secret_key_file:   {}",
                config
                    .secret_key_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  session_whitelist: {}",
                if config.session_whitelist.is_empty() {
                    "(none)".to_string()
                } else {
                    config.session_whitelist.join(", ")
                }
            );
            println!(
                "  max_connections:   {}",
                if config.max_connections == 0 {
                    "unlimited".to_string()
                } else {
                    config.max_connections.to_string()
                }
            );
            println!("  data_dir:          {}", config.data_dir.display());
            println!(
                "  log_level:         {}",
                config.log_level.as_deref().unwrap_or("(not set)")
            );
            println!("  session keys:      {}", config.session.len());
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "secret_key" { "(hidden)" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "bind_addr" => {
            value
                .parse::<std::net::SocketAddr>()
                .context("Invalid value for bind_addr. Use host:port, e.g. 127.0.0.1:8765.")?;
            config.bind_addr = value.to_string();
        }
        "call_timeout_ms" => {
            config.call_timeout_ms = value
                .parse()
                .context("Invalid value for call_timeout_ms. Use a number of milliseconds.")?;
        }
        "secret_key" => {
            config.secret_key = optional(value);
        }
        "secret_key_file" => {
            config.secret_key_file = optional(value).map(PathBuf::from);
        }
        "session_whitelist" => {
            config.session_whitelist = value
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty() && *k != "none")
                .map(str::to_string)
                .collect();
        }
        "max_connections" => {
            config.max_connections = value
                .parse()
                .context("Invalid value for max_connections. Use a number (0 = unlimited).")?;
        }
        "data_dir" => {
            config.data_dir = value.into();
        }
        "log_level" => {
            config.log_level = optional(value);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: bind_addr, call_timeout_ms, secret_key, secret_key_file, \
                 session_whitelist, max_connections, data_dir, log_level",
                key
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}
