//! User-level IPv4 router and NAT policy engine.
//!
//! The router interconnects isolated network domains. Each domain is
//! reached through one client session and carries its own address space
//! and rule set:
//!
//! - [`Router`]: applies configurations, opens and closes sessions and
//!   handles received frames
//! - [`Domain`]: rule trees, ARP cache, waiters and link index of one zone
//! - [`Interface`]: the binding of a session to its domain
//! - [`ArpWaiter`]: frames buffered until a next hop is resolved
//! - [`Link`]: a tracked, translated flow
//!
//! # Architecture
//!
//! 1. A [`RouterConfig`] is applied as a new generation of domains
//! 2. Sessions are bound to domains by label through the policies
//! 3. Each received frame is routed by link, forward rule, port route or
//!    IP rule, translated if a NAT rule applies and handed to the
//!    destination interface's [`NicSink`]
//! 4. Frames for unresolved next hops wait in an [`ArpWaiter`]
//! 5. The caller drives deadlines through [`Router::next_timeout`] and
//!    [`Router::handle_timeouts`]
//!
//! # Example
//!
//! ```
//! use nic_router::{DomainConfig, NicSink, Router, RouterConfig, TransmitError};
//! use nic_router_common::{MonotonicClock, PortAllocator};
//!
//! struct Discard;
//!
//! impl NicSink for Discard {
//!     fn transmit(&mut self, _frame: &[u8]) -> Result<(), TransmitError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut router = Router::new(
//!     PortAllocator::shared(),
//!     PortAllocator::shared(),
//!     Box::new(MonotonicClock::new()),
//! );
//! let config = RouterConfig::default()
//!     .with_policy("lan", "lan")
//!     .with_domain(DomainConfig::new("lan").with_interface("10.0.1.1/24"));
//! assert!(router.apply_config(&config).is_clean());
//!
//! let session = router.open_session("lan-1", Box::new(Discard)).unwrap();
//! assert_eq!(router.domain("lan").unwrap().interface(), Some(session));
//! ```

mod arp;
mod config;
mod domain;
mod error;
mod interface;
mod label;
mod link;
mod packet;
mod report;
mod router;
mod rules;

use nic_router_common::Handle;

pub use arp::{ArpCache, ArpWaiter, WaiterState};
pub use config::{
    DomainConfig, ForwardRuleConfig, IpRuleConfig, L4Protocol, NatRuleConfig, PolicyConfig, PortRouteConfig,
    RouterConfig,
};
pub use domain::{Domain, DomainStats, IpConfig};
pub use error::{ConfigError, DomainError, SessionError, TransmitError};
pub use interface::{Interface, NicSink};
pub use label::LabelTree;
pub use link::{Link, LinkRole, LinkSide, LinkSideId};
pub use report::{DomainReport, InterfaceReport, RouterReport};
pub use router::{ApplyReport, DropReason, PacketVerdict, Router, RouterSettings, TimeoutReport};
pub use rules::{ForwardRule, IpRule, NatRule, PortRoute};

pub type DomainId = Handle<Domain>;
pub type InterfaceId = Handle<Interface>;
pub type WaiterId = Handle<ArpWaiter>;
pub type LinkId = Handle<Link>;
