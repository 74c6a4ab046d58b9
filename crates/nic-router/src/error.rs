//! Error types of the policy engine.

use crate::InterfaceId;
use nic_router_common::PortAllocError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// A configuration entry that was rejected and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("domain {0} is defined more than once")]
    DuplicateDomain(String),

    #[error("domain {domain}: invalid {field} '{value}'")]
    InvalidAddress {
        domain: String,
        field: &'static str,
        value: String,
    },

    #[error("domain {domain}: rule refers to unknown domain {target}")]
    UnknownDomain { domain: String, target: String },

    #[error("domain {domain}: duplicate {rule}")]
    DuplicateRule { domain: String, rule: String },

    #[error("domain {domain}: cannot pin forward port {port}: {error}")]
    PortPinned {
        domain: String,
        port: u16,
        error: PortAllocError,
    },

    #[error("duplicate policy for label prefix '{0}'")]
    DuplicatePolicy(String),

    #[error("policy '{label_prefix}' selects unknown domain {domain}")]
    UnknownPolicyDomain { label_prefix: String, domain: String },
}

impl ConfigError {
    pub(crate) fn invalid_address(domain: &str, field: &'static str, value: &str) -> Self {
        ConfigError::InvalidAddress {
            domain: domain.to_string(),
            field,
            value: value.to_string(),
        }
    }

    pub(crate) fn unknown_domain(domain: &str, target: &str) -> Self {
        ConfigError::UnknownDomain {
            domain: domain.to_string(),
            target: target.to_string(),
        }
    }

    pub(crate) fn duplicate_rule(domain: &str, rule: impl Into<String>) -> Self {
        ConfigError::DuplicateRule {
            domain: domain.to_string(),
            rule: rule.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Failure to open or close a client session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no policy matches session label '{0}'")]
    NoPolicy(String),

    #[error("session label '{label}' selects unknown domain {domain}")]
    UnknownDomain { label: String, domain: String },

    #[error("domain {0} already has an interface")]
    DomainBusy(String),

    #[error("unknown session {0}")]
    UnknownSession(InterfaceId),

    #[error("session {0} is already bound to a domain")]
    AlreadyBound(InterfaceId),
}

/// Failure of a domain-level operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("unknown domain {0}")]
    UnknownDomain(String),

    #[error("domain {0} has no IP config")]
    NoIpConfig(String),

    #[error("domain {0} has a static IP config")]
    StaticIpConfig(String),

    #[error("domain {domain}: no next hop for {ip}")]
    NoNextHop { domain: String, ip: Ipv4Addr },

    #[error("domain {name} is still referenced (rules: {ref_count}, interface bound: {interface_bound})")]
    StillReferenced {
        name: String,
        ref_count: u32,
        interface_bound: bool,
    },
}

/// Failure reported by a [`NicSink`](crate::NicSink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("transmit buffer full")]
    BufferFull,

    #[error("session closed")]
    Closed,
}
