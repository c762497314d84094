//! Event categories the debugger can toggle.
//!
//! Each step is reported with an optional tag naming its category. A
//! breakpoint only stops a step whose category is enabled; categories the
//! catalog does not know, and untagged steps, always stop.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::protocol::ExceptionBreakpointsFilter;

pub trait EventFilters: Send + Sync {
    /// The catalog offered in the `initialize` response.
    fn filters(&self) -> Vec<ExceptionBreakpointsFilter>;
    /// Enable exactly `enabled`, disabling every other catalog entry.
    fn reset(&self, enabled: &[String]);
    fn is_enabled(&self, category: Option<&str>) -> bool;
}

/// Default [`EventFilters`] over a fixed catalog.
pub struct Events {
    catalog: Vec<ExceptionBreakpointsFilter>,
    state: RwLock<HashMap<String, bool>>,
}

impl Events {
    /// A catalog of `filters`, with `enabled` switched on.
    pub fn new<I, S>(filters: I, enabled: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog: Vec<ExceptionBreakpointsFilter> = filters
            .into_iter()
            .map(Into::into)
            .map(|name: String| ExceptionBreakpointsFilter {
                label: name.clone(),
                default: enabled.contains(&name),
                filter: name,
            })
            .collect();
        let state = catalog
            .iter()
            .map(|f| (f.filter.clone(), f.default))
            .collect();
        Self {
            catalog,
            state: RwLock::new(state),
        }
    }
}

impl EventFilters for Events {
    fn filters(&self) -> Vec<ExceptionBreakpointsFilter> {
        self.catalog.clone()
    }

    fn reset(&self, enabled: &[String]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for (name, on) in state.iter_mut() {
            *on = enabled.contains(name);
        }
        let unknown: Vec<&String> = enabled.iter().filter(|n| !state.contains_key(*n)).collect();
        if !unknown.is_empty() {
            tracing::debug!(?unknown, "ignoring filters outside the catalog");
        }
    }

    fn is_enabled(&self, category: Option<&str>) -> bool {
        let Some(category) = category else {
            return true;
        };
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
            .copied()
            .unwrap_or(true)
    }
}
