//! Bidirectional object <-> code tables and wire-handle packing.
//!
//! Objects are keyed by reference identity: two `Arc`s pointing at the same
//! allocation share one code, equal-but-distinct values get different codes.
//! The table holds a strong reference to every registered object, so an
//! address cannot be recycled while its code is live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::RegistryError;

/// Handle value reserved for "no expandable object".
pub const SCALAR_HANDLE: u64 = 0;

/// Pack a session code and a session-local code into one wire handle.
///
/// The session code occupies the high 32 bits, the local code the low 32.
pub fn encode(session: u32, local: u32) -> u64 {
    (u64::from(session) << 32) | u64::from(local)
}

/// Split a wire handle back into `(session, local)`.
pub fn decode(handle: u64) -> (u32, u32) {
    ((handle >> 32) as u32, handle as u32)
}

fn address<T: ?Sized>(item: &Arc<T>) -> usize {
    Arc::as_ptr(item) as *const () as usize
}

struct Table<T: ?Sized> {
    by_code: HashMap<u32, Arc<T>>,
    by_address: HashMap<usize, u32>,
    last: u32,
}

impl<T: ?Sized> Table<T> {
    fn next_code(&mut self) -> Result<u32, RegistryError> {
        let code = self.last.checked_add(1).ok_or(RegistryError::Exhausted)?;
        self.last = code;
        Ok(code)
    }
}

/// A thread-safe registry issuing small integer codes for shared objects.
///
/// Codes start at 1 and are never reused within one table.
pub struct Identifier<T: ?Sized> {
    table: Mutex<Table<T>>,
}

impl<T: ?Sized> Default for Identifier<T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table {
                by_code: HashMap::new(),
                by_address: HashMap::new(),
                last: 0,
            }),
        }
    }
}

impl<T: ?Sized> Identifier<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_after(last: u32) -> Self {
        let table = Self::default();
        table.lock().last = last;
        table
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `item`, returning its existing code if it is already known.
    pub fn add(&self, item: &Arc<T>) -> Result<u32, RegistryError> {
        let mut table = self.lock();
        let key = address(item);
        if let Some(code) = table.by_address.get(&key) {
            return Ok(*code);
        }
        let code = table.next_code()?;
        table.by_code.insert(code, Arc::clone(item));
        table.by_address.insert(key, code);
        Ok(code)
    }

    /// Reserve a code and register the object `build` creates for it.
    ///
    /// Lets an object carry its own code from construction.
    pub fn add_with<F>(&self, build: F) -> Result<(u32, Arc<T>), RegistryError>
    where
        F: FnOnce(u32) -> Arc<T>,
    {
        let mut table = self.lock();
        let code = table.next_code()?;
        let item = build(code);
        table.by_address.insert(address(&item), code);
        table.by_code.insert(code, Arc::clone(&item));
        Ok((code, item))
    }

    /// Resolve a code, failing with [`RegistryError::NotFound`].
    pub fn lookup(&self, code: u32) -> Result<Arc<T>, RegistryError> {
        self.try_lookup(code).ok_or(RegistryError::NotFound(code))
    }

    /// Resolve a code if it is live.
    pub fn try_lookup(&self, code: u32) -> Option<Arc<T>> {
        self.lock().by_code.get(&code).cloned()
    }

    /// The code currently assigned to `item`, if any.
    pub fn code_of(&self, item: &Arc<T>) -> Option<u32> {
        self.lock().by_address.get(&address(item)).copied()
    }

    /// Drop `item` from the table. Returns the code it held.
    pub fn remove(&self, item: &Arc<T>) -> Option<u32> {
        let mut table = self.lock();
        let code = table.by_address.remove(&address(item))?;
        table.by_code.remove(&code);
        Some(code)
    }

    /// Snapshot of every live entry, ordered by code.
    pub fn entries(&self) -> Vec<(u32, Arc<T>)> {
        let table = self.lock();
        let mut entries: Vec<_> = table
            .by_code
            .iter()
            .map(|(code, item)| (*code, Arc::clone(item)))
            .collect();
        entries.sort_by_key(|(code, _)| *code);
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
