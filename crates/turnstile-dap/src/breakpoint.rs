//! Breakpoint bookkeeping.
//!
//! The bridge only asks the [`BreakpointService`] whether an item should
//! stop and which breakpoints changed; [`Breakpoints`] is the default
//! service, resolving line and function breakpoints against a
//! [`SourceRegistry`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::DapError;
use crate::model::{same_item, CodeModel, Item, Traceable};
use crate::protocol::{Breakpoint, FunctionBreakpoint, Source, SourceBreakpoint};
use crate::source::{SourceRange, SourceRegistry};

pub trait BreakpointService: Send + Sync {
    /// Replace every line breakpoint in `source`.
    fn set_breakpoints(&self, source: &Path, specs: &[SourceBreakpoint]) -> Vec<Breakpoint>;
    /// Replace every function breakpoint.
    fn set_function_breakpoints(&self, specs: &[FunctionBreakpoint]) -> Vec<Breakpoint>;
    /// Re-resolve pending breakpoints and return those whose state changed.
    fn apply_updates(&self) -> Result<Vec<Breakpoint>, DapError>;
    fn is_breakpoint(&self, item: &dyn Traceable) -> bool;
    /// The item a verified breakpoint is bound to.
    fn item_for(&self, breakpoint: &Breakpoint) -> Option<Item>;
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Line { path: PathBuf, line: i64, column: Option<i64> },
    Function(String),
}

struct Entry {
    id: u32,
    target: Target,
    bound: Option<(Item, SourceRange)>,
}

impl Entry {
    fn to_wire(&self) -> Breakpoint {
        if let Some((_, range)) = &self.bound {
            return Breakpoint {
                id: self.id,
                verified: true,
                message: None,
                source: Some(range.source()),
                line: Some(range.start.line),
                column: Some(range.start.column),
                end_line: Some(range.end.line),
                end_column: Some(range.end.column),
            };
        }
        let (source, line, column, message) = match &self.target {
            Target::Line { path, line, column } => (
                Some(Source::from_path(path)),
                Some(*line),
                *column,
                format!("no dialog step at line {line}"),
            ),
            Target::Function(name) => (None, None, None, format!("no dialog step named '{name}'")),
        };
        Breakpoint {
            id: self.id,
            verified: false,
            message: Some(message),
            source,
            line,
            column,
            end_line: None,
            end_column: None,
        }
    }
}

struct State {
    entries: Vec<Entry>,
    next_id: u32,
    generation: u64,
}

/// Default [`BreakpointService`].
pub struct Breakpoints {
    sources: Arc<SourceRegistry>,
    code_model: Arc<dyn CodeModel>,
    state: Mutex<State>,
}

impl Breakpoints {
    pub fn new(sources: Arc<SourceRegistry>, code_model: Arc<dyn CodeModel>) -> Self {
        let generation = sources.generation();
        Self {
            sources,
            code_model,
            state: Mutex::new(State {
                entries: Vec::new(),
                next_id: 1,
                generation,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, target: &Target) -> Option<(Item, SourceRange)> {
        match target {
            Target::Line { path, line, .. } => self.sources.item_at(path, *line),
            Target::Function(name) => self
                .sources
                .entries()
                .into_iter()
                .filter(|(item, _)| self.code_model.name_for(item.as_ref()) == *name)
                .min_by(|(_, a), (_, b)| (&a.path, a.start).cmp(&(&b.path, b.start))),
        }
    }

    fn replace<F>(&self, keep: F, targets: Vec<Target>) -> Vec<Breakpoint>
    where
        F: Fn(&Target) -> bool,
    {
        let resolved: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let bound = self.resolve(&target);
                (target, bound)
            })
            .collect();

        let mut state = self.lock();
        state.entries.retain(|entry| keep(&entry.target));
        let mut created = Vec::with_capacity(resolved.len());
        for (target, bound) in resolved {
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1).max(1);
            let entry = Entry { id, target, bound };
            created.push(entry.to_wire());
            state.entries.push(entry);
        }
        created
    }
}

impl BreakpointService for Breakpoints {
    fn set_breakpoints(&self, source: &Path, specs: &[SourceBreakpoint]) -> Vec<Breakpoint> {
        let targets = specs
            .iter()
            .map(|spec| Target::Line {
                path: source.to_path_buf(),
                line: spec.line,
                column: spec.column,
            })
            .collect();
        let created = self.replace(
            |target| !matches!(target, Target::Line { path, .. } if path == source),
            targets,
        );
        tracing::debug!(
            source = %source.display(),
            count = created.len(),
            verified = created.iter().filter(|b| b.verified).count(),
            "line breakpoints replaced"
        );
        created
    }

    fn set_function_breakpoints(&self, specs: &[FunctionBreakpoint]) -> Vec<Breakpoint> {
        let targets = specs
            .iter()
            .map(|spec| Target::Function(spec.name.clone()))
            .collect();
        self.replace(|target| !matches!(target, Target::Function(_)), targets)
    }

    fn apply_updates(&self) -> Result<Vec<Breakpoint>, DapError> {
        let generation = self.sources.generation();
        let targets: Vec<(u32, Target)> = {
            let mut state = self.lock();
            if state.generation == generation {
                return Ok(Vec::new());
            }
            state.generation = generation;
            state
                .entries
                .iter()
                .map(|entry| (entry.id, entry.target.clone()))
                .collect()
        };

        let resolved: Vec<_> = targets
            .into_iter()
            .map(|(id, target)| (id, self.resolve(&target)))
            .collect();

        let mut state = self.lock();
        let mut changed = Vec::new();
        for (id, bound) in resolved {
            let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) else {
                continue;
            };
            let same = match (&entry.bound, &bound) {
                (Some((old, old_range)), Some((new, new_range))) => {
                    same_item(old.as_ref(), new.as_ref()) && old_range == new_range
                }
                (None, None) => true,
                _ => false,
            };
            if !same {
                entry.bound = bound;
                changed.push(entry.to_wire());
            }
        }
        Ok(changed)
    }

    fn is_breakpoint(&self, item: &dyn Traceable) -> bool {
        self.lock().entries.iter().any(|entry| {
            entry
                .bound
                .as_ref()
                .is_some_and(|(bound, _)| same_item(bound.as_ref(), item))
        })
    }

    fn item_for(&self, breakpoint: &Breakpoint) -> Option<Item> {
        self.lock()
            .entries
            .iter()
            .find(|entry| entry.id == breakpoint.id)
            .and_then(|entry| entry.bound.as_ref().map(|(item, _)| item.clone()))
    }
}
