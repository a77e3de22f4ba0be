//! Ampere Core Library
//!
//! Server-pushed instructions over a persistent WebSocket, with synchronous
//! calls that wait for the client's reply, a signed client-side key/value
//! store, and a client-side engine that keeps node properties alive across
//! server-driven content replacement.
//!
//! # Architecture
//!
//! - **Hub**: connection lifecycle, call correlation and broadcast on the server
//! - **Tokens**: HMAC-signed store and session payloads held by the client
//! - **Sync engine**: property registry keyed by partial region and ampere
//!
//! # Quick Start
//!
//! ```text
//! let (hub, mut events) = Hub::new(TokenCodec::generate()?, HubSettings::default());
//! let server = AmpereServer::new(ServerConfig::default(), hub.clone());
//! tokio::spawn(async move { server.run().await });
//!
//! while let Some(HubEvent::Attached(ctx)) = events.recv().await {
//!     let sum = hub.call_or_fail(&ctx, Instruction::Eval("2 + 2".into())).await?;
//! }
//! ```
//!
//! # Modules
//!
//! - `hub`: server-side entry point
//! - `server`: WebSocket transport for the hub
//! - `client`: instruction dispatcher and reconnecting client
//! - `dom`: document model and synchronization engine
//! - `protocol`: wire messages and instruction vocabulary
//! - `token`: store and session token signing
//! - `config`: application configuration

pub mod client;
pub mod config;
pub mod dom;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod token;

/// String-keyed JSON mapping used for the store and session snapshot
pub type KeyValues = std::collections::BTreeMap<String, serde_json::Value>;

pub use config::Config;
pub use error::{CallError, CallOutcome};
pub use hub::{ConnectionContext, Hub, HubEvent, HubSettings, Topic};
pub use protocol::Instruction;
pub use server::{AmpereServer, ServerConfig};
pub use token::{TokenCodec, TokenPurpose};
