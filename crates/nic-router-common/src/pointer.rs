//! Non-owning references with explicit bound/unbound state.
//!
//! Two long-lived router objects frequently need to name each other: a
//! domain names the interface currently bound to it, an ARP waiter names
//! the domain it waits for. Neither side owns the other, and either side
//! may legitimately be absent for a while. These wrappers make that state
//! explicit and turn misuse into a typed error:
//!
//! - [`Pointer`] may be rebound, but only after an explicit `unset()`
//! - [`ConstPointer`] is either empty or bound once at construction

use thiserror::Error;

/// Error type for pointer misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PointerError {
    #[error("pointer is already bound")]
    AlreadyBound,

    #[error("pointer is not bound")]
    Unbound,
}

/// A single-assignment reference that can be unset and bound again.
///
/// The referent is usually a [`Handle`](crate::Handle) into an
/// [`Arena`](crate::Arena), so the pointer never participates in
/// ownership or destruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer<T> {
    Unbound,
    Bound(T),
}

impl<T> Pointer<T> {
    /// Creates an unbound pointer.
    pub const fn new() -> Self {
        Pointer::Unbound
    }

    /// Creates a pointer bound to `referent`.
    pub const fn bound(referent: T) -> Self {
        Pointer::Bound(referent)
    }

    /// Binds the pointer.
    ///
    /// # Errors
    ///
    /// Returns [`PointerError::AlreadyBound`] if the pointer is bound; the
    /// existing binding is left untouched.
    pub fn set(&mut self, referent: T) -> Result<(), PointerError> {
        match self {
            Pointer::Bound(_) => Err(PointerError::AlreadyBound),
            Pointer::Unbound => {
                *self = Pointer::Bound(referent);
                Ok(())
            }
        }
    }

    /// Returns the referent.
    ///
    /// # Errors
    ///
    /// Returns [`PointerError::Unbound`] if the pointer was never set or
    /// has been unset.
    pub fn get(&self) -> Result<&T, PointerError> {
        match self {
            Pointer::Bound(referent) => Ok(referent),
            Pointer::Unbound => Err(PointerError::Unbound),
        }
    }

    /// Unbinds the pointer, returning the previous referent if any.
    ///
    /// Always succeeds and is idempotent.
    pub fn unset(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Pointer::Bound(referent) => Some(referent),
            Pointer::Unbound => None,
        }
    }

    /// Returns true if the pointer is bound.
    pub const fn is_bound(&self) -> bool {
        matches!(self, Pointer::Bound(_))
    }

    /// Returns the referent as an `Option`, for call sites where absence
    /// is an ordinary outcome.
    pub fn as_option(&self) -> Option<&T> {
        self.get().ok()
    }
}

impl<T: Copy> Pointer<T> {
    /// Returns a copy of the referent.
    pub fn copied(&self) -> Result<T, PointerError> {
        self.get().copied()
    }
}

impl<T> Default for Pointer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference that is either empty or bound for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstPointer<T>(Option<T>);

impl<T> ConstPointer<T> {
    /// Creates a pointer permanently bound to `referent`.
    pub const fn new(referent: T) -> Self {
        ConstPointer(Some(referent))
    }

    /// Creates a pointer that stays empty.
    pub const fn empty() -> Self {
        ConstPointer(None)
    }

    /// Returns the referent.
    ///
    /// # Errors
    ///
    /// Returns [`PointerError::Unbound`] for an empty pointer.
    pub fn get(&self) -> Result<&T, PointerError> {
        self.0.as_ref().ok_or(PointerError::Unbound)
    }

    /// Returns true if the pointer is bound.
    pub const fn is_bound(&self) -> bool {
        self.0.is_some()
    }
}

impl<T: Copy> ConstPointer<T> {
    /// Returns a copy of the referent.
    pub fn copied(&self) -> Result<T, PointerError> {
        self.get().copied()
    }
}

impl<T> Default for ConstPointer<T> {
    fn default() -> Self {
        Self::empty()
    }
}
