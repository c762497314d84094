//! A [`DialogContext`] backed by shared JSON memory.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::data::{JsonNode, Memory, ValueRef};
use crate::model::{Context, DialogContext, Item};

/// One dialog level whose scopes are top-level keys of a JSON document.
pub struct MemoryContext {
    memory: Memory,
    stack: Vec<Item>,
    parent: Option<Context>,
    tags: Vec<String>,
}

impl MemoryContext {
    /// Wrap a JSON document as shared memory.
    pub fn new_memory(value: Value) -> Memory {
        Arc::new(RwLock::new(value))
    }

    /// A level whose stack holds `stack`, innermost first.
    pub fn new(memory: Memory, stack: Vec<Item>) -> Self {
        Self {
            memory,
            stack,
            parent: None,
            tags: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: Context) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

impl DialogContext for MemoryContext {
    fn stack(&self) -> Vec<Item> {
        self.stack.clone()
    }

    fn parent(&self) -> Option<Context> {
        self.parent.clone()
    }

    fn scope(&self, name: &str) -> Option<ValueRef> {
        if name == "dialog" && self.stack.is_empty() {
            return None;
        }
        let node = JsonNode::root(self.memory.clone()).child(name);
        node.exists().then(|| Arc::new(node) as ValueRef)
    }

    fn active_tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn evaluate(&self, expression: &str) -> Option<ValueRef> {
        JsonNode::root(self.memory.clone())
            .resolve(expression)
            .map(|node| Arc::new(node) as ValueRef)
    }
}
