//! Address resolution: the per-domain ARP cache and the waiters that
//! buffer frames until a reply arrives.

mod cache;
mod waiter;

pub use cache::ArpCache;
pub use waiter::{ArpWaiter, WaiterState};
