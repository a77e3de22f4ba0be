//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use ampere_core::client::ClientEvent;
use ampere_core::{CallOutcome, KeyValues};
use serde_json::json;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a signed token
    ///
    /// Quiet mode prints the bare token so it can be piped.
    pub fn print_token(&self, token: &str) {
        match self.format {
            OutputFormat::Human | OutputFormat::Quiet => println!("{}", token),
            OutputFormat::Json => println!("{}", json!({ "token": token })),
        }
    }

    /// Print a decoded token payload
    pub fn print_payload(&self, values: &KeyValues, verified: bool) {
        match self.format {
            OutputFormat::Human => {
                if values.is_empty() {
                    println!("(empty)");
                } else {
                    let width = values.keys().map(|k| k.len()).max().unwrap_or(0);
                    for (key, value) in values {
                        println!("{:width$}  {}", key, value, width = width);
                    }
                }
                if !verified {
                    println!();
                    println!("(signature not checked)");
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "verified": verified,
                        "payload": values,
                    }))
                    .unwrap_or_default()
                );
            }
            OutputFormat::Quiet => {
                println!("{}", serde_json::to_string(values).unwrap_or_default());
            }
        }
    }

    /// Print the result of an eval call
    pub fn print_outcome(&self, connection: &str, outcome: &CallOutcome) {
        let (status, detail) = match outcome {
            CallOutcome::Ok(value) => ("ok", value.to_string()),
            CallOutcome::Error(text) => ("error", text.clone()),
            CallOutcome::TimedOut(after) => ("timeout", format!("{} ms", after.as_millis())),
            CallOutcome::ConnectionClosed => ("closed", String::new()),
        };

        match self.format {
            OutputFormat::Human => println!("{} {:7} {}", short_id(connection), status, detail),
            OutputFormat::Json => println!(
                "{}",
                json!({ "connection": connection, "status": status, "result": detail })
            ),
            OutputFormat::Quiet => println!("{}", detail),
        }
    }

    /// Print a client runtime event
    pub fn print_client_event(&self, event: &ClientEvent) {
        match (self.format, event) {
            (OutputFormat::Quiet, _) => {}
            (OutputFormat::Human, ClientEvent::StatusChanged(status)) => {
                println!("status: {:?}", status)
            }
            (OutputFormat::Human, ClientEvent::Attached(id)) => {
                println!("attached as {}", id)
            }
            (OutputFormat::Human, ClientEvent::Executed { command, replied }) => {
                let suffix = if *replied { " (replied)" } else { "" };
                println!("← {}{}", command, suffix)
            }
            (OutputFormat::Human, ClientEvent::Error(message)) => println!("error: {}", message),
            (OutputFormat::Json, ClientEvent::StatusChanged(status)) => {
                println!("{}", json!({ "event": "status", "status": format!("{:?}", status) }))
            }
            (OutputFormat::Json, ClientEvent::Attached(id)) => {
                println!("{}", json!({ "event": "attached", "connection": id }))
            }
            (OutputFormat::Json, ClientEvent::Executed { command, replied }) => println!(
                "{}",
                json!({ "event": "executed", "command": command, "replied": replied })
            ),
            (OutputFormat::Json, ClientEvent::Error(message)) => {
                println!("{}", json!({ "event": "error", "message": message }))
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First eight characters of an identifier
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
