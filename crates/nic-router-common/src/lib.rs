//! Common machinery for the NIC router.
//!
//! This crate provides the building blocks the policy engine uses to tie
//! long-lived, mutually referencing objects together without dangling
//! references:
//!
//! - [`Pointer`] / [`ConstPointer`]: non-owning references that are either
//!   unbound or bound, with typed errors on misuse
//! - [`Arena`] / [`Handle`]: owning storage that hands out stable, never
//!   reused handles instead of references
//! - [`PortAllocator`] / [`PortAllocatorGuard`]: ephemeral port bitmap and
//!   the quota-limited view a NAT rule gets of it
//! - [`CachedTimer`]: reads a [`Clock`] once per processing batch
//!
//! # Example
//!
//! ```
//! use nic_router_common::{Pointer, PointerError};
//!
//! let mut interface: Pointer<u32> = Pointer::new();
//! assert_eq!(interface.get(), Err(PointerError::Unbound));
//!
//! interface.set(7).unwrap();
//! assert_eq!(interface.set(8), Err(PointerError::AlreadyBound));
//! assert_eq!(interface.get(), Ok(&7));
//! ```

mod arena;
mod cached_timer;
mod pointer;
mod port_allocator;

pub use arena::{Arena, ArenaError, Handle, HasRefCount};
pub use cached_timer::{CachedTimer, Clock, ManualClock, MonotonicClock};
pub use pointer::{ConstPointer, Pointer, PointerError};
pub use port_allocator::{
    PortAllocError, PortAllocator, PortAllocatorGuard, SharedPortAllocator,
    EPHEMERAL_PORT_COUNT, FIRST_EPHEMERAL_PORT,
};
