//! Serve command handler

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use ampere_core::hub::StaticSession;
use ampere_core::{
    AmpereServer, Config, Hub, HubEvent, HubSettings, Instruction, ServerConfig, TokenCodec,
};

use crate::output::Output;

/// Options for `ampere serve`
pub struct ServeOptions {
    /// Overrides `bind_addr`
    pub bind: Option<String>,
    /// Expression evaluated on every client right after it attaches
    pub eval: Option<String>,
    /// Overrides `call_timeout_ms`
    pub timeout_ms: Option<u64>,
}

/// Run the server until Ctrl-C
pub async fn run(options: ServeOptions, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    if let Some(bind) = options.bind {
        config.bind_addr = bind;
    }
    if let Some(ms) = options.timeout_ms {
        config.call_timeout_ms = ms;
    }

    let codec = signing_codec(&config)?;
    let (hub, events) = Hub::with_sessions(
        codec,
        HubSettings::from(&config),
        StaticSession::new(config.session.clone()),
    );

    let server = AmpereServer::new(ServerConfig::from_config(&config)?, hub.clone());
    output.message(&format!("Listening on ws://{}", server.bind_addr()));

    tokio::spawn(watch_events(hub, events, options.eval, *output));

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

/// Token codec from the configured secret, or a throwaway one
fn signing_codec(config: &Config) -> Result<TokenCodec> {
    match config.secret()? {
        Some(secret) => Ok(TokenCodec::new(&secret)),
        None => {
            tracing::warn!("No secret_key configured; store tokens will not survive a restart");
            TokenCodec::generate()
        }
    }
}

async fn watch_events(
    hub: Hub,
    mut events: mpsc::UnboundedReceiver<HubEvent>,
    eval: Option<String>,
    output: Output,
) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Attached(ctx) => {
                tracing::info!(
                    connection = %ctx.id(),
                    page = %ctx.page(),
                    clients = hub.connection_count(),
                    "Client attached"
                );

                if let Some(code) = eval.clone() {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        let outcome = hub.call(&ctx, Instruction::Eval(code)).await;
                        output.print_outcome(&ctx.id().to_string(), &outcome);
                    });
                }
            }
            HubEvent::Detached(id) => {
                tracing::info!(connection = %id, clients = hub.connection_count(), "Client detached");
            }
        }
    }
}
