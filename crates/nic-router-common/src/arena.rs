//! Handle-indexed object store for router objects.
//!
//! Domains, interfaces, ARP waiters and links reference each other through
//! [`Handle`]s rather than Rust references. An [`Arena`] owns the objects;
//! lookups return `Option` and never create entries. Handles are never
//! reused, so a stale handle simply finds nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use thiserror::Error;

/// Error type for reference-count operations on an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("Handle not found")]
    KeyNotFound,

    #[error("Reference count underflow")]
    RefCountUnderflow,
}

/// Trait for types that have a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    /// Returns the current reference count.
    fn ref_count(&self) -> u32;
}

/// A typed, copyable identifier of an object stored in an [`Arena<T>`].
pub struct Handle<T> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the numeric identifier.
    pub const fn raw(&self) -> u64 {
        self.raw
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

/// Owner of all objects of one kind.
///
/// Iteration visits objects in insertion order.
///
/// # Example
///
/// ```
/// use nic_router_common::Arena;
///
/// let mut arena = Arena::new();
/// let lan = arena.insert("lan");
/// assert_eq!(arena.get(lan), Some(&"lan"));
///
/// arena.remove(lan);
/// assert!(arena.get(lan).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Arena<T> {
    inner: BTreeMap<u64, T>,
    next: u64,
}

impl<T> Arena<T> {
    /// Creates a new empty arena.
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            next: 0,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `f`, which receives the handle the value
    /// will be stored under.
    pub fn insert_with<F>(&mut self, f: F) -> Handle<T>
    where
        F: FnOnce(Handle<T>) -> T,
    {
        let handle = Handle::from_raw(self.next);
        self.next += 1;
        self.inner.insert(handle.raw, f(handle));
        handle
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if `handle` names a stored object.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.inner.contains_key(&handle.raw)
    }

    /// Returns a reference to the object, or `None` for stale handles.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.inner.get(&handle.raw)
    }

    /// Returns a mutable reference to the object, or `None` for stale handles.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.inner.get_mut(&handle.raw)
    }

    /// Removes and returns the object.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        self.inner.remove(&handle.raw)
    }

    /// Returns an iterator over handle/object pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.inner.iter().map(|(raw, value)| (Handle::from_raw(*raw), value))
    }

    /// Returns a snapshot of all handles, so the arena can be mutated
    /// while walking it.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.inner.keys().map(|raw| Handle::from_raw(*raw)).collect()
    }

    /// Returns an iterator over objects.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.inner.values()
    }

    /// Returns a mutable iterator over objects.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.inner.values_mut()
    }
}

impl<T: HasRefCount> Arena<T> {
    /// Increments the reference count of the object.
    ///
    /// Returns the new count, or an error if the handle is stale.
    pub fn increment_ref(&mut self, handle: Handle<T>) -> Result<u32, ArenaError> {
        match self.inner.get_mut(&handle.raw) {
            Some(entry) => Ok(entry.increment_ref()),
            None => Err(ArenaError::KeyNotFound),
        }
    }

    /// Decrements the reference count of the object.
    ///
    /// Returns the new count, or an error if the handle is stale or the
    /// count would underflow.
    pub fn decrement_ref(&mut self, handle: Handle<T>) -> Result<u32, ArenaError> {
        match self.inner.get_mut(&handle.raw) {
            Some(entry) => entry.decrement_ref().ok_or(ArenaError::RefCountUnderflow),
            None => Err(ArenaError::KeyNotFound),
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
