//! Client-side document synchronization
//!
//! This module keeps client-local node state alive across server-driven
//! content replacement. It has three parts:
//!
//! - `document`: arena element tree with attributes and live properties
//! - `parse`: HTML fragment parsing into the arena
//! - `sync`: the [`SyncEngine`], which tracks tagged nodes and remembers
//!   their property values
//!
//! # Markup
//!
//! ```text
//! <div data-partial="row1">
//!   <input data-ampere="a91f" @value='{{ "" }}' @style.background-color='{{ "white" }}'>
//! </div>
//! ```
//!
//! Script evaluation and event binding belong to the host environment and
//! are plugged in through [`ScriptHost`] and [`EventBinder`].

mod document;
mod parse;
mod path;
mod sync;

use serde_json::Value;
use thiserror::Error;

pub use document::{Document, NodeId};
pub use path::{binding_literal, binding_path, camel_case};
pub use sync::{
    RegistryKey, Replacement, SyncEngine, AMPERE_ATTRIBUTE, PARTIAL_ATTRIBUTE, SCRIPT_ATTRIBUTE,
};

/// Errors from document operations
#[derive(Error, Debug)]
pub enum DomError {
    #[error("Invalid property path: '{0}'")]
    InvalidPath(String),

    #[error("Invalid property binding: '{0}'")]
    InvalidBinding(String),

    #[error("Node is not an element")]
    NotAnElement,

    #[error("Unknown node")]
    UnknownNode,

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Errors raised while evaluating code
///
/// The display text is sent back to the server verbatim in error replies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("{0} is not defined")]
    NotDefined(String),

    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("{0}")]
    Runtime(String),

    #[error("script evaluation is not available")]
    Unavailable,
}

/// Evaluates code in the document context
pub trait ScriptHost: Send {
    fn evaluate(&mut self, code: &str) -> Result<Value, ScriptError>;
}

/// Host without a script engine
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScripts;

impl ScriptHost for NoScripts {
    fn evaluate(&mut self, _code: &str) -> Result<Value, ScriptError> {
        Err(ScriptError::Unavailable)
    }
}

/// Restores interactive behavior after content replacement
pub trait EventBinder: Send {
    /// Called once per replacement with every node whose content changed
    fn rebind(&mut self, ampere: &str, targets: &[NodeId], document: &Document);
}

/// Binder that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBindings;

impl EventBinder for NoBindings {
    fn rebind(&mut self, _ampere: &str, _targets: &[NodeId], _document: &Document) {}
}
