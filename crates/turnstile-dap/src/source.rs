//! Mapping dialog steps back to the files that declared them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::model::{item_key, Item, Traceable};
use crate::protocol::Source;

/// A 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: i64,
    pub column: i64,
}

impl Position {
    pub fn new(line: i64, column: i64) -> Self {
        Self { line, column }
    }
}

/// The span of a file that declares one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub path: PathBuf,
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    pub fn new(path: impl Into<PathBuf>, start: Position, end: Position) -> Self {
        Self {
            path: path.into(),
            start,
            end,
        }
    }

    /// Whether `line` falls within the range.
    pub fn contains_line(&self, line: i64) -> bool {
        self.start.line <= line && line <= self.end.line
    }

    /// Orders nested ranges innermost first.
    fn extent(&self) -> (i64, i64) {
        (
            self.end.line - self.start.line,
            self.end.column - self.start.column,
        )
    }

    pub fn source(&self) -> Source {
        Source::from_path(&self.path)
    }
}

/// Resolves an item to where it was declared.
pub trait SourceMap: Send + Sync {
    fn resolve(&self, item: &dyn Traceable) -> Option<SourceRange>;
}

/// In-memory [`SourceMap`] filled by the engine as it loads dialogs.
///
/// Every change bumps [`generation`](SourceRegistry::generation) so
/// breakpoint resolution can tell when to retry.
#[derive(Default)]
pub struct SourceRegistry {
    entries: RwLock<HashMap<usize, (Item, SourceRange)>>,
    generation: AtomicU64,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or move) the declaration of `item`.
    pub fn add(&self, item: &Item, range: SourceRange) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_key(item.as_ref()), (item.clone(), range));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove(&self, item: &dyn Traceable) -> Option<SourceRange> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&item_key(item))
            .map(|(_, range)| range);
        if removed.is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Incremented on every add or remove.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The innermost item declared in `path` whose range covers `line`.
    pub fn item_at(&self, path: &Path, line: i64) -> Option<(Item, SourceRange)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(_, range)| range.path == path && range.contains_line(line))
            .min_by_key(|(_, range)| (range.extent(), range.start))
            .cloned()
    }

    /// Every registered item with its range.
    pub fn entries(&self) -> Vec<(Item, SourceRange)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl SourceMap for SourceRegistry {
    fn resolve(&self, item: &dyn Traceable) -> Option<SourceRange> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&item_key(item))
            .map(|(_, range)| range.clone())
    }
}
