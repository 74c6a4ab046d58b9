//! Rule trees consulted when routing a packet.
//!
//! Every tree returns either the unique matching rule or nothing, and
//! rejects duplicate keys on insertion. Trees are rebuilt from scratch on
//! every configuration generation.

mod forward;
mod ip_rule;
mod nat;
mod port_route;

pub use forward::{ForwardRule, ForwardRuleTree};
pub use ip_rule::{IpRule, IpRuleTree};
pub use nat::{NatRule, NatRuleTree};
pub use port_route::{PortRoute, PortRouteTree};
