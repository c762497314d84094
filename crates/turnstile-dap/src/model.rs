//! How the bridge sees the hosted dialog engine.
//!
//! The engine hands the bridge [`Item`]s (the steps it executes) and
//! [`Context`]s (its per-level dialog state). A [`CodeModel`] turns those
//! into named [`Frame`]s for the debugger's call stack.

use std::sync::Arc;

use crate::data::{Scope, ValueRef};

/// Anything the engine can report as a step.
pub trait Traceable: Send + Sync + 'static {
    /// Short type name, e.g. `"TextInput"`.
    fn kind(&self) -> &str;

    /// Dialog id; `None` for steps that are not dialogs.
    fn id(&self) -> Option<&str> {
        None
    }
}

/// A shared step handle. Identity is the allocation, not the value.
pub type Item = Arc<dyn Traceable>;

/// Identity key of an item, stable for as long as the item is alive.
pub fn item_key(item: &dyn Traceable) -> usize {
    item as *const dyn Traceable as *const () as usize
}

/// Whether two handles refer to the same step.
pub fn same_item(a: &dyn Traceable, b: &dyn Traceable) -> bool {
    item_key(a) == item_key(b)
}

/// One level of the engine's dialog state.
pub trait DialogContext: Send + Sync {
    /// Dialogs on this level's stack, innermost first.
    fn stack(&self) -> Vec<Item>;

    /// The enclosing level, if this one was started by a parent dialog.
    fn parent(&self) -> Option<Context>;

    /// A named memory scope (`user`, `conversation`, `dialog`, `turn`).
    ///
    /// `dialog` is `None` when no dialog is active on this level.
    fn scope(&self, name: &str) -> Option<ValueRef>;

    /// Tags attached to the active dialog.
    fn active_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Resolve an expression against this level's memory.
    fn evaluate(&self, expression: &str) -> Option<ValueRef>;
}

pub type Context = Arc<dyn DialogContext>;

/// A named, inspectable point in a turn's call chain.
pub trait Frame: Send + Sync {
    fn name(&self) -> String;
    fn item(&self) -> &Item;
    /// The frame's variables as one expandable value.
    fn data(&self) -> ValueRef;
    fn evaluate(&self, expression: &str) -> Option<ValueRef>;
}

/// Names items and expands a reported step into stack frames.
pub trait CodeModel: Send + Sync {
    fn name_for(&self, item: &dyn Traceable) -> String;

    /// Frames for a step, the reported item first and outermost dialogs last.
    fn frames_for(
        &self,
        context: &Context,
        item: &Item,
        tag: Option<&str>,
    ) -> Vec<Arc<dyn Frame>>;
}

/// Default [`CodeModel`] for dialog engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialogCodeModel;

impl CodeModel for DialogCodeModel {
    fn name_for(&self, item: &dyn Traceable) -> String {
        let kind = item.kind();
        match item.id() {
            Some(id) if id.starts_with(kind) => id.to_string(),
            Some(id) => format!("{kind}:{id}"),
            None => kind.to_string(),
        }
    }

    fn frames_for(
        &self,
        context: &Context,
        item: &Item,
        tag: Option<&str>,
    ) -> Vec<Arc<dyn Frame>> {
        let mut frames: Vec<Arc<dyn Frame>> = vec![Arc::new(CodePoint::new(
            self,
            context.clone(),
            item.clone(),
            tag,
        ))];

        let mut level = Some(context.clone());
        while let Some(current) = level {
            for dialog in current.stack() {
                frames.push(Arc::new(CodePoint::new(self, current.clone(), dialog, None)));
            }
            level = current.parent();
        }
        frames
    }
}

/// A frame produced by [`DialogCodeModel`].
pub struct CodePoint {
    context: Context,
    item: Item,
    name: String,
}

impl CodePoint {
    pub fn new(model: &dyn CodeModel, context: Context, item: Item, tag: Option<&str>) -> Self {
        let base = model.name_for(item.as_ref());
        let name = match tag {
            Some(tag) => format!("{base}:{tag}"),
            None => base,
        };
        Self {
            context,
            item,
            name,
        }
    }
}

impl Frame for CodePoint {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn item(&self) -> &Item {
        &self.item
    }

    fn data(&self) -> ValueRef {
        let mut scope = Scope::new();
        for name in ["user", "conversation", "dialog", "turn"] {
            scope.insert_optional(name, self.context.scope(name));
        }
        scope.insert_json(
            "tags",
            serde_json::Value::from(self.context.active_tags()),
        );
        Arc::new(scope)
    }

    fn evaluate(&self, expression: &str) -> Option<ValueRef> {
        self.context.evaluate(expression)
    }
}

/// A plain named step, for engines that have no richer item type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    kind: String,
    id: Option<String>,
}

impl Step {
    /// A dialog step with an id.
    pub fn dialog(kind: impl Into<String>, id: impl Into<String>) -> Item {
        Arc::new(Self {
            kind: kind.into(),
            id: Some(id.into()),
        })
    }

    /// A non-dialog step known only by its kind.
    pub fn action(kind: impl Into<String>) -> Item {
        Arc::new(Self {
            kind: kind.into(),
            id: None,
        })
    }
}

impl Traceable for Step {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}
