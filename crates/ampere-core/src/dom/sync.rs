//! Synchronization engine
//!
//! Tracks tagged nodes ("amperes") and a property registry keyed by
//! `(region instance, ampere)`. Every write that goes through the engine is
//! remembered, and remembered values are written back onto new nodes with
//! the same key after their container is replaced.
//!
//! Scoped operations match nodes that have an ancestor (or are themselves) a
//! region whose `data-partial` value equals the requested name.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::document::{Document, NodeId};
use super::{parse, path};
use super::{DomError, EventBinder, NoBindings, NoScripts, ScriptError, ScriptHost};
use crate::protocol::{AttributePatch, ContentPatch, PropertyPatch, PropertyQuery};

/// Region boundary attribute
pub const PARTIAL_ATTRIBUTE: &str = "data-partial";

/// Stable node identity attribute
pub const AMPERE_ATTRIBUTE: &str = "data-ampere";

/// Marks a node whose replacement content is code
pub const SCRIPT_ATTRIBUTE: &str = "data-ampere-script";

/// Property registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey {
    /// Innermost enclosing region instance
    pub region: Option<String>,
    pub ampere: String,
}

/// What `replace_content` did
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// No matching node exists
    Skipped,
    /// Content of this many nodes was replaced
    Replaced(usize),
    /// Content was evaluated as code
    Evaluated(Value),
}

/// Client-side node state tracker
pub struct SyncEngine {
    document: Document,
    index: HashMap<String, Vec<NodeId>>,
    properties: HashMap<RegistryKey, BTreeMap<String, Value>>,
    scripts: Box<dyn ScriptHost>,
    binder: Box<dyn EventBinder>,
}

impl SyncEngine {
    /// Take over a document and run the initial discovery pass
    pub fn new(document: Document) -> Self {
        let mut engine = Self {
            document,
            index: HashMap::new(),
            properties: HashMap::new(),
            scripts: Box::new(NoScripts),
            binder: Box::new(NoBindings),
        };
        let root = engine.document.root();
        engine.scan(root);
        engine.apply_known_properties(root);
        engine
    }

    /// Parse `html` as the initial document
    pub fn parse(html: &str) -> Self {
        Self::new(Document::parse(html))
    }

    pub fn with_script_host<S: ScriptHost + 'static>(mut self, host: S) -> Self {
        self.scripts = Box::new(host);
        self
    }

    pub fn with_event_binder<B: EventBinder + 'static>(mut self, binder: B) -> Self {
        self.binder = Box::new(binder);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Direct document access for host-side changes the engine does not see
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Discovery pass
    ///
    /// Indexes tagged nodes under `root` and seeds the registry with declared
    /// bindings that have no remembered value yet. Returns the number of
    /// tagged nodes found.
    pub fn scan(&mut self, root: NodeId) -> usize {
        let mut tagged = 0;
        for node in self.document.descendants(root) {
            let Some(key) = self.key_for(node) else {
                continue;
            };
            tagged += 1;

            let nodes = self.index.entry(key.ampere.clone()).or_default();
            if !nodes.contains(&node) {
                nodes.push(node);
            }

            for (name, raw) in self.document.attributes(node) {
                let Some(path) = path::binding_path(name) else {
                    continue;
                };
                match path::binding_literal(raw) {
                    Ok(literal) => {
                        self.properties
                            .entry(key.clone())
                            .or_default()
                            .entry(path)
                            .or_insert(literal);
                    }
                    Err(e) => tracing::debug!(ampere = %key.ampere, error = %e, "Skipping binding"),
                }
            }
        }
        tagged
    }

    /// Reapplication pass
    ///
    /// Writes every remembered value onto the matching live nodes under
    /// `root`. Returns the number of property writes.
    pub fn apply_known_properties(&mut self, root: NodeId) -> usize {
        let mut writes = 0;
        for node in self.document.descendants(root) {
            let Some(key) = self.key_for(node) else {
                continue;
            };
            let Some(known) = self.properties.get(&key) else {
                continue;
            };
            for (path, value) in known {
                match self.document.set_property(node, path, value.clone()) {
                    Ok(()) => writes += 1,
                    Err(e) => tracing::debug!(ampere = %key.ampere, path = %path, error = %e, "Failed to reapply property"),
                }
            }
        }
        writes
    }

    /// Live nodes tagged `ampere`, optionally limited to one region
    pub fn targets(&self, ampere: &str, partial: Option<&str>) -> Vec<NodeId> {
        self.index
            .get(ampere)
            .into_iter()
            .flatten()
            .copied()
            .filter(|node| self.document.is_attached(*node))
            .filter(|node| partial.map_or(true, |name| self.in_region(*node, name)))
            .collect()
    }

    /// Set an attribute on every matching node
    ///
    /// Setting `value` also writes the live `value` property. Rewriting an
    /// identity or region attribute rebuilds the index.
    pub fn set_attribute(&mut self, patch: &AttributePatch) -> Result<usize, DomError> {
        let targets = self.targets(&patch.ampere, patch.partial.as_deref());
        for node in &targets {
            self.document.set_attribute(*node, &patch.name, &patch.value)?;
            if patch.name == "value" {
                self.write_property(*node, "value", Value::String(patch.value.clone()))?;
            }
        }

        let structural = [AMPERE_ATTRIBUTE, PARTIAL_ATTRIBUTE].contains(&patch.name.as_str());
        if structural && !targets.is_empty() {
            self.index.clear();
            let root = self.document.root();
            self.scan(root);
        }
        Ok(targets.len())
    }

    /// Write a property on every matching node and remember it
    pub fn set_property(&mut self, patch: &PropertyPatch) -> Result<usize, DomError> {
        let targets = self.targets(&patch.ampere, patch.partial.as_deref());
        for node in &targets {
            self.write_property(*node, &patch.path, patch.value.clone())?;
        }
        Ok(targets.len())
    }

    /// Live value on the first matching node
    pub fn get_property(&self, query: &PropertyQuery) -> Option<Value> {
        self.targets(&query.ampere, query.partial.as_deref())
            .into_iter()
            .find_map(|node| self.document.property(node, &query.path).cloned())
    }

    /// Record a user-originated property change
    pub fn record_input(&mut self, node: NodeId, path: &str, value: Value) -> Result<(), DomError> {
        self.write_property(node, path, value)
    }

    /// Remembered value for a key and path
    pub fn known_property(&self, key: &RegistryKey, path: &str) -> Option<&Value> {
        self.properties.get(key)?.get(path)
    }

    /// Replace the content of every matching node
    ///
    /// Content is evaluated as code instead when the patch says so or a
    /// target carries the script marker. Nothing happens when no node
    /// matches.
    pub fn replace_content(&mut self, patch: &ContentPatch) -> Result<Replacement, DomError> {
        let targets = self.targets(&patch.ampere, patch.partial.as_deref());
        if targets.is_empty() {
            tracing::debug!(ampere = %patch.ampere, partial = ?patch.partial, "No target for replacement");
            return Ok(Replacement::Skipped);
        }

        let is_script = patch.script
            || targets
                .iter()
                .any(|node| self.document.attribute(*node, SCRIPT_ATTRIBUTE).is_some());
        if is_script {
            let value = self.scripts.evaluate(&patch.html)?;
            return Ok(Replacement::Evaluated(value));
        }

        let mut replaced = Vec::with_capacity(targets.len());
        for target in targets {
            // Dropped with the content of an outer target
            if !self.document.is_attached(target) {
                continue;
            }
            self.capture_live_values(target);
            for child in self.document.remove_children(target) {
                self.document.release(child);
            }
            for node in parse::fragment(&mut self.document, &patch.html) {
                self.document.append_child(target, node);
            }
            replaced.push(target);
        }
        replaced.retain(|target| self.document.is_attached(*target));
        self.prune_index();

        for target in &replaced {
            self.scan(*target);
            self.apply_known_properties(*target);
        }

        self.binder.rebind(&patch.ampere, &replaced, &self.document);
        tracing::debug!(ampere = %patch.ampere, targets = replaced.len(), "Content replaced");
        Ok(Replacement::Replaced(replaced.len()))
    }

    /// Evaluate code through the script host
    pub fn evaluate(&mut self, code: &str) -> Result<Value, ScriptError> {
        self.scripts.evaluate(code)
    }

    fn write_property(&mut self, node: NodeId, path: &str, value: Value) -> Result<(), DomError> {
        self.document.set_property(node, path, value.clone())?;
        if let Some(key) = self.key_for(node) {
            self.properties
                .entry(key)
                .or_default()
                .insert(path.to_string(), value);
        }
        Ok(())
    }

    /// Copy live values of remembered properties below `target` into the
    /// registry before those nodes are dropped
    fn capture_live_values(&mut self, target: NodeId) {
        let children: Vec<NodeId> = self.document.children(target).to_vec();
        for child in children {
            for node in self.document.descendants(child) {
                let Some(key) = self.key_for(node) else {
                    continue;
                };
                let Some(known) = self.properties.get_mut(&key) else {
                    continue;
                };
                for (path, remembered) in known.iter_mut() {
                    if let Some(live) = self.document.property(node, path) {
                        *remembered = live.clone();
                    }
                }
            }
        }
    }

    fn prune_index(&mut self) {
        let document = &self.document;
        self.index.retain(|_, nodes| {
            nodes.retain(|node| document.is_attached(*node));
            !nodes.is_empty()
        });
    }

    fn key_for(&self, node: NodeId) -> Option<RegistryKey> {
        let ampere = self.document.attribute(node, AMPERE_ATTRIBUTE)?;
        Some(RegistryKey {
            region: self.region_of(node),
            ampere: ampere.to_string(),
        })
    }

    /// Name of the innermost region containing `node`
    fn region_of(&self, node: NodeId) -> Option<String> {
        self.document
            .ancestors(node)
            .into_iter()
            .find_map(|n| self.document.attribute(n, PARTIAL_ATTRIBUTE))
            .map(str::to_string)
    }

    fn in_region(&self, node: NodeId, partial: &str) -> bool {
        self.document
            .ancestors(node)
            .into_iter()
            .any(|n| self.document.attribute(n, PARTIAL_ATTRIBUTE) == Some(partial))
    }
}
