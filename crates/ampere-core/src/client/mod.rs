//! Client runtime
//!
//! Everything a headless client needs to take part in the protocol:
//!
//! - `dispatcher`: executes instructions against a [`crate::dom::SyncEngine`]
//! - `connection`: reconnecting WebSocket task that drives the dispatcher
//! - `storage`: where the store token lives between connections
//! - `script`: a small expression evaluator usable as the script host

mod connection;
mod dispatcher;
mod script;
mod storage;

pub use connection::{
    spawn_client, ClientCommand, ClientConfig, ClientEvent, ClientHandle, ConnectionStatus,
};
pub use dispatcher::Dispatcher;
pub use script::ExpressionHost;
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
