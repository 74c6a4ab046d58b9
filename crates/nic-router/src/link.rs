//! Links: tracked flows that carry an address translation.
//!
//! A link has a client side, indexed in the domain the flow originated
//! in, and a server side, indexed in the domain it was routed to. Packets
//! matching either side are translated without consulting the rule trees
//! again.

use crate::config::L4Protocol;
use crate::{DomainId, InterfaceId};
use nic_router_common::{ConstPointer, PointerError};
use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Addresses of a packet as it arrives at one side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkSideId {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl LinkSideId {
    pub fn new(src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        Self {
            src_ip: *src.ip(),
            src_port: src.port(),
            dst_ip: *dst.ip(),
            dst_port: dst.port(),
        }
    }

    pub fn src(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.src_ip, self.src_port)
    }

    pub fn dst(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.dst_ip, self.dst_port)
    }
}

impl fmt::Display for LinkSideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src(), self.dst())
    }
}

/// Key of a link side in a domain's link index.
pub type LinkKey = (L4Protocol, LinkSideId);

/// Which side of a link a domain index entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSide {
    pub domain: DomainId,
    pub id: LinkSideId,
}

/// Where and how to send a packet that matched a link side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTranslation {
    pub domain: DomainId,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub via: Option<Ipv4Addr>,
}

#[derive(Debug)]
pub struct Link {
    protocol: L4Protocol,
    pub(crate) client: LinkSide,
    pub(crate) server: LinkSide,
    client_interface: ConstPointer<InterfaceId>,
    server_via: Option<Ipv4Addr>,
    nat_port: Option<u16>,
    deadline: Duration,
}

impl Link {
    pub fn new(
        protocol: L4Protocol,
        client: LinkSide,
        server: LinkSide,
        client_interface: InterfaceId,
        server_via: Option<Ipv4Addr>,
        nat_port: Option<u16>,
        deadline: Duration,
    ) -> Self {
        Self {
            protocol,
            client,
            server,
            client_interface: ConstPointer::new(client_interface),
            server_via,
            nat_port,
            deadline,
        }
    }

    pub fn protocol(&self) -> L4Protocol {
        self.protocol
    }

    pub fn client(&self) -> &LinkSide {
        &self.client
    }

    pub fn server(&self) -> &LinkSide {
        &self.server
    }

    pub fn client_key(&self) -> LinkKey {
        (self.protocol, self.client.id)
    }

    pub fn server_key(&self) -> LinkKey {
        (self.protocol, self.server.id)
    }

    pub fn client_interface(&self) -> Result<InterfaceId, PointerError> {
        self.client_interface.copied()
    }

    pub fn server_via(&self) -> Option<Ipv4Addr> {
        self.server_via
    }

    /// Port allocated through the server domain's NAT rule, if the flow
    /// is source-translated.
    pub fn nat_port(&self) -> Option<u16> {
        self.nat_port
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn refresh(&mut self, deadline: Duration) {
        self.deadline = deadline;
    }

    /// Translates a packet that arrived at the `role` side.
    pub fn translate(&self, role: LinkRole) -> LinkTranslation {
        match role {
            LinkRole::Client => LinkTranslation {
                domain: self.server.domain,
                src: self.server.id.dst(),
                dst: self.server.id.src(),
                via: self.server_via,
            },
            LinkRole::Server => LinkTranslation {
                domain: self.client.domain,
                src: self.client.id.dst(),
                dst: self.client.id.src(),
                via: None,
            },
        }
    }
}
