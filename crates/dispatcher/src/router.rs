//! Router - topic path -> handlers
//!
//! Entries live in one vector that is sorted lazily on the first lookup
//! after an insertion. Lookup is a binary search for the exact path plus one
//! probe per level for a trailing `#` wildcard.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use contracts::{Message, Receiver};

use crate::topic::{split_topic, WILDCARD};

struct Registry<T> {
    entries: Vec<(Vec<String>, T)>,
    sorted: bool,
}

impl<T: Clone> Registry<T> {
    fn sort(&mut self) {
        // stable: duplicates keep insertion order
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.sorted = true;
    }

    fn collect_exact(&self, path: &[String], out: &mut Vec<T>) {
        let start = self
            .entries
            .partition_point(|(p, _)| p.as_slice() < path);
        out.extend(
            self.entries[start..]
                .iter()
                .take_while(|(p, _)| p.as_slice() == path)
                .map(|(_, v)| v.clone()),
        );
    }

    fn lookup(&self, path: &[String]) -> Vec<T> {
        let mut found = Vec::new();
        self.collect_exact(path, &mut found);

        let mut candidate: Vec<String> = Vec::with_capacity(path.len() + 1);
        for level in (0..=path.len()).rev() {
            candidate.clear();
            candidate.extend_from_slice(&path[..level]);
            candidate.push(WILDCARD.to_string());
            self.collect_exact(&candidate, &mut found);
        }
        found
    }
}

/// Registry of `(path, value)` pairs with MQTT wildcard lookup
pub struct Router<T> {
    registry: RwLock<Registry<T>>,
}

impl<T: Clone> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Router<T> {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                entries: Vec::new(),
                sorted: true,
            }),
        }
    }

    /// Register `value` under `path`. Duplicate paths are kept.
    pub fn add(&self, path: Vec<String>, value: T) {
        let mut registry = self.write();
        registry.entries.push((path, value));
        registry.sorted = false;
    }

    /// Values registered at `path` or at a `#` wildcard above it.
    ///
    /// Exact matches come first, then wildcards from the deepest level up
    /// to the global `#`.
    pub fn find(&self, path: &[String]) -> Vec<T> {
        {
            let registry = self.read();
            if registry.sorted {
                return registry.lookup(path);
            }
        }

        let mut registry = self.write();
        // another caller may have sorted while we waited for the write lock
        if !registry.sorted {
            registry.sort();
        }
        registry.lookup(path)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered paths in insertion or sorted order, duplicates included
    pub fn paths(&self) -> Vec<Vec<String>> {
        self.read().entries.iter().map(|(p, _)| p.clone()).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<T>> {
        self.registry.read().unwrap_or_else(|poisoned| {
            warn!("router lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<T>> {
        self.registry.write().unwrap_or_else(|poisoned| {
            warn!("router lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl<R: Receiver + ?Sized> Router<Arc<R>> {
    /// Hand `message` to every handler found for its topic, in order.
    ///
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, message: &Message) -> usize {
        let handlers = self.find(&split_topic(&message.topic));
        for handler in &handlers {
            handler.receive(message);
        }
        handlers.len()
    }
}

impl<R: Receiver + ?Sized> Receiver for Router<Arc<R>> {
    fn receive(&self, message: &Message) {
        self.deliver(message);
    }
}
