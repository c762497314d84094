//! Inspecting and editing values the debugger can see.
//!
//! Values travel as type-erased [`ValueRef`]s so the engine can expose
//! whatever it stores; a [`DataModel`] knows how to look inside them.
//! [`JsonDataModel`] handles [`JsonNode`] and [`Scope`] values.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::error::DapError;

/// A shared, type-erased value.
pub type ValueRef = Arc<dyn Any + Send + Sync>;

/// Shared JSON memory that [`JsonNode`]s point into.
pub type Memory = Arc<RwLock<Value>>;

/// Reads and writes the members of values.
pub trait DataModel: Send + Sync {
    /// Scalars have no members and are never given a handle.
    fn is_scalar(&self, value: &ValueRef) -> bool;
    fn names(&self, value: &ValueRef) -> Vec<String>;
    fn get(&self, value: &ValueRef, name: &str) -> Option<ValueRef>;
    /// Assign `name` inside `value` and return what is now stored there.
    fn set(&self, value: &ValueRef, name: &str, new_value: ValueRef) -> Result<ValueRef, DapError>;
    /// Turn debugger-entered text into a value.
    fn parse(&self, text: &str) -> Result<ValueRef, DapError>;
    fn display(&self, value: &ValueRef) -> String;
}

/// A location inside shared JSON memory.
///
/// Nodes are views: reads see the current memory and writes go through.
#[derive(Debug, Clone)]
pub struct JsonNode {
    memory: Memory,
    pointer: String,
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

impl JsonNode {
    pub fn new(memory: Memory, pointer: impl Into<String>) -> Self {
        Self {
            memory,
            pointer: pointer.into(),
        }
    }

    /// A node for the whole of `memory`.
    pub fn root(memory: Memory) -> Self {
        Self::new(memory, "")
    }

    /// A node owning a private copy of `value`.
    pub fn detached(value: Value) -> Self {
        Self::root(Arc::new(RwLock::new(value)))
    }

    /// JSON pointer of this node within its memory.
    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// Run `f` on the current value, if the location still exists.
    pub fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> Option<R> {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        memory.pointer(&self.pointer).map(f)
    }

    /// A copy of the current value.
    pub fn value(&self) -> Option<Value> {
        self.with_value(Value::clone)
    }

    /// The member `name` (object key or array index), whether or not it exists.
    pub fn child(&self, name: &str) -> JsonNode {
        JsonNode::new(
            self.memory.clone(),
            format!("{}/{}", self.pointer, escape_token(name)),
        )
    }

    pub fn exists(&self) -> bool {
        self.with_value(|_| ()).is_some()
    }

    /// Follow a dotted path such as `user.name` or `dialog.items[1].title`.
    ///
    /// Returns `None` when any segment is unbound.
    pub fn resolve(&self, path: &str) -> Option<JsonNode> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let mut node = self.clone();
        for segment in path.split('.') {
            let (name, indices) = match segment.find('[') {
                Some(open) => (&segment[..open], &segment[open..]),
                None => (segment, ""),
            };
            if !name.is_empty() {
                node = node.child(name.trim());
            }
            for index in indices.split('[').skip(1) {
                let index = index.strip_suffix(']')?.trim().trim_matches(|c| c == '\'' || c == '"');
                node = node.child(index);
            }
        }
        node.exists().then_some(node)
    }

    /// Replace the value at this location, creating it inside its parent
    /// object if needed.
    pub fn write(&self, value: Value) -> Result<(), DapError> {
        let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = memory.pointer_mut(&self.pointer) {
            *slot = value;
            return Ok(());
        }
        let (parent, token) = self
            .pointer
            .rsplit_once('/')
            .ok_or_else(|| DapError::Data("cannot replace a detached value".into()))?;
        let key = token.replace("~1", "/").replace("~0", "~");
        match memory.pointer_mut(parent) {
            Some(Value::Object(map)) => {
                map.insert(key, value);
                Ok(())
            }
            Some(Value::Array(items)) if key.parse::<usize>().ok() == Some(items.len()) => {
                items.push(value);
                Ok(())
            }
            Some(Value::Array(_)) => Err(DapError::Data(format!("index {key} is out of range"))),
            Some(_) => Err(DapError::Data(format!("'{parent}' has no members"))),
            None => Err(DapError::Data(format!("'{parent}' no longer exists"))),
        }
    }
}

/// A fixed set of named values shown as one expandable node.
#[derive(Default, Clone)]
pub struct Scope {
    entries: Vec<(String, ValueRef)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ValueRef) {
        self.entries.push((name.into(), value));
    }

    /// Insert a private JSON value.
    pub fn insert_json(&mut self, name: impl Into<String>, value: Value) {
        self.insert(name, Arc::new(JsonNode::detached(value)));
    }

    /// Insert `value`, or JSON `null` when absent.
    pub fn insert_optional(&mut self, name: impl Into<String>, value: Option<ValueRef>) {
        match value {
            Some(value) => self.insert(name, value),
            None => self.insert_json(name, Value::Null),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueRef> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

const DISPLAY_LIMIT: usize = 120;

fn truncate(mut text: String) -> String {
    if text.chars().count() > DISPLAY_LIMIT {
        text = text.chars().take(DISPLAY_LIMIT - 3).collect();
        text.push_str("...");
    }
    text
}

/// [`DataModel`] over [`JsonNode`] and [`Scope`] values.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDataModel;

impl DataModel for JsonDataModel {
    fn is_scalar(&self, value: &ValueRef) -> bool {
        if value.is::<Scope>() {
            return false;
        }
        match value.downcast_ref::<JsonNode>() {
            Some(node) => !node
                .with_value(|v| v.is_object() || v.is_array())
                .unwrap_or(false),
            None => true,
        }
    }

    fn names(&self, value: &ValueRef) -> Vec<String> {
        if let Some(scope) = value.downcast_ref::<Scope>() {
            return scope.names().map(str::to_string).collect();
        }
        value
            .downcast_ref::<JsonNode>()
            .and_then(|node| {
                node.with_value(|v| match v {
                    Value::Object(map) => map.keys().cloned().collect(),
                    Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
                    _ => Vec::new(),
                })
            })
            .unwrap_or_default()
    }

    fn get(&self, value: &ValueRef, name: &str) -> Option<ValueRef> {
        if let Some(scope) = value.downcast_ref::<Scope>() {
            return scope.get(name).cloned();
        }
        let child = value.downcast_ref::<JsonNode>()?.child(name);
        child.exists().then(|| Arc::new(child) as ValueRef)
    }

    fn set(&self, value: &ValueRef, name: &str, new_value: ValueRef) -> Result<ValueRef, DapError> {
        let json = new_value
            .downcast_ref::<JsonNode>()
            .and_then(JsonNode::value)
            .ok_or_else(|| DapError::Data("only JSON values can be assigned".into()))?;

        if let Some(scope) = value.downcast_ref::<Scope>() {
            let target = scope
                .get(name)
                .ok_or_else(|| DapError::Data(format!("no scope named '{name}'")))?;
            let node = target
                .downcast_ref::<JsonNode>()
                .ok_or_else(|| DapError::Data(format!("scope '{name}' is read-only")))?;
            node.write(json)?;
            return Ok(target.clone());
        }

        let node = value
            .downcast_ref::<JsonNode>()
            .ok_or_else(|| DapError::Data("value has no assignable members".into()))?;
        let child = node.child(name);
        child.write(json)?;
        Ok(Arc::new(child))
    }

    fn parse(&self, text: &str) -> Result<ValueRef, DapError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| DapError::Data(format!("'{text}' is not a JSON literal: {e}")))?;
        Ok(Arc::new(JsonNode::detached(value)))
    }

    fn display(&self, value: &ValueRef) -> String {
        if let Some(scope) = value.downcast_ref::<Scope>() {
            return format!("{{{}}}", scope.names().collect::<Vec<_>>().join(", "));
        }
        match value.downcast_ref::<JsonNode>() {
            Some(node) => node
                .with_value(|v| truncate(v.to_string()))
                .unwrap_or_else(|| "undefined".to_string()),
            None => "<opaque>".to_string(),
        }
    }
}
