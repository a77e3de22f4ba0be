//! Connect command handler

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use ampere_core::client::{
    spawn_client, ClientCommand, ClientConfig, Dispatcher, ExpressionHost, FileStorage,
    MemoryStorage, TokenStorage,
};
use ampere_core::dom::SyncEngine;
use ampere_core::protocol::WireFormat;
use ampere_core::Config;

use crate::output::{Output, OutputFormat};

/// Options for `ampere connect`
pub struct ConnectOptions {
    pub url: String,
    pub page: String,
    /// Initial document markup
    pub html: Option<PathBuf>,
    /// Use binary CBOR frames
    pub cbor: bool,
    /// Keep the store token in memory only
    pub ephemeral: bool,
}

/// Run a headless client until Ctrl-C
pub async fn run(options: ConnectOptions, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    let html = match &options.html {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document from {:?}", path))?,
        None => String::new(),
    };

    let storage: Arc<dyn TokenStorage> = if options.ephemeral {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(FileStorage::for_server(&config.token_dir(), &options.url))
    };

    let engine = SyncEngine::parse(&html).with_script_host(ExpressionHost::new());
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(engine, storage)));

    let client_config = ClientConfig {
        url: options.url.clone(),
        page: options.page.clone(),
        format: if options.cbor {
            WireFormat::Cbor
        } else {
            WireFormat::Json
        },
        ..ClientConfig::default()
    };
    let mut handle = spawn_client(client_config, dispatcher.clone());

    loop {
        tokio::select! {
            event = handle.event_rx.recv() => {
                match event {
                    Some(event) => output.print_client_event(&event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = handle.command_tx.send(ClientCommand::Shutdown).await;
                break;
            }
        }
    }

    let dispatcher = dispatcher.lock().await;
    match output.format {
        OutputFormat::Human => {
            let document = dispatcher.engine().document();
            println!();
            println!("── Document ──");
            println!("{}", document.inner_html(document.root()));
            println!("── Store ──");
            output.print_payload(&dispatcher.store(), false);
        }
        OutputFormat::Json => {
            let document = dispatcher.engine().document();
            println!(
                "{}",
                serde_json::json!({
                    "document": document.inner_html(document.root()),
                    "store": dispatcher.store(),
                    "session": dispatcher.session(),
                })
            );
        }
        OutputFormat::Quiet => {}
    }

    Ok(())
}
