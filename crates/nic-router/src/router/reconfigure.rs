//! Applying a configuration as a new generation of domains.
//!
//! The old generation is torn down only after everything that outlives it
//! has been moved over: interfaces are rebound by label, ARP waiters are
//! retargeted to the domain of the same name and links are kept if the
//! new rules would still route their flow the same way.

use super::{ApplyReport, Router, RouterSettings};
use crate::config::{
    DomainConfig, ForwardRuleConfig, IpRuleConfig, L4Protocol, NatRuleConfig, PortRouteConfig, RouterConfig,
};
use crate::domain::{Domain, IpConfig};
use crate::error::ConfigError;
use crate::label::LabelTree;
use crate::rules::{ForwardRule, IpRule, NatRule, PortRoute};
use crate::{DomainId, InterfaceId, LinkId};
use nic_router_types::Ipv4AddressPrefix;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

const PROTOCOLS: [L4Protocol; 2] = [L4Protocol::Tcp, L4Protocol::Udp];

fn parse_address<T: FromStr>(domain: &str, field: &'static str, text: &str) -> Result<T, ConfigError> {
    text.parse()
        .map_err(|_| ConfigError::invalid_address(domain, field, text))
}

fn reject(report: &mut ApplyReport, error: ConfigError) {
    warn!(%error, "Rejected configuration entry");
    report.errors.push(error);
}

impl Router {
    /// Replaces the active configuration.
    ///
    /// Malformed or conflicting entries are skipped and listed in the
    /// returned report; everything else takes effect.
    pub fn apply_config(&mut self, config: &RouterConfig) -> ApplyReport {
        self.timer.update_cached_time();
        self.generation += 1;
        self.settings = RouterSettings::from(config);
        let mut report = ApplyReport {
            generation: self.generation,
            ..ApplyReport::default()
        };

        let old_names = std::mem::take(&mut self.domain_names);
        self.dismantle_generation(&old_names);

        let built = self.build_domains(config, &old_names, &mut report);
        self.build_policies(config, &mut report);
        for (domain_config, id) in built {
            let accepted = self.apply_rules(domain_config, id, &mut report);
            report.rules += accepted;
        }

        self.rehome_interfaces(&old_names);
        self.rehome_waiters(&old_names);
        self.revalidate_links(&old_names);
        self.destroy_generation(&old_names);

        report.domains = self.domain_names.len();
        info!(
            generation = report.generation,
            domains = report.domains,
            rules = report.rules,
            errors = report.errors.len(),
            "Applied configuration"
        );
        report
    }

    /// Empties the rule trees of the old generation so that no domain
    /// references another any more.
    fn dismantle_generation(&mut self, old_names: &BTreeMap<String, DomainId>) {
        for &id in old_names.values() {
            let Some(domain) = self.domains.get_mut(id) else {
                continue;
            };
            for target in domain.dismantle_rules() {
                if let Err(err) = self.domains.decrement_ref(target) {
                    error!(domain = %id, %target, %err, "Failed to release rule reference");
                }
            }
        }
    }

    fn build_domains<'c>(
        &mut self,
        config: &'c RouterConfig,
        old_names: &BTreeMap<String, DomainId>,
        report: &mut ApplyReport,
    ) -> Vec<(&'c DomainConfig, DomainId)> {
        let mut built = Vec::new();
        for domain_config in &config.domains {
            let name = domain_config.name.as_str();
            if self.domain_names.contains_key(name) {
                reject(report, ConfigError::DuplicateDomain(name.to_string()));
                continue;
            }
            let prefix = match &domain_config.interface {
                Some(text) => match parse_address::<Ipv4AddressPrefix>(name, "interface", text) {
                    Ok(prefix) => Some(prefix),
                    Err(err) => {
                        reject(report, err);
                        continue;
                    }
                },
                None => None,
            };
            let gateway = match (&domain_config.gateway, prefix) {
                (Some(text), Some(prefix)) => match parse_address::<Ipv4Addr>(name, "gateway", text) {
                    Ok(gateway) if prefix.prefix_matches(gateway) => Some(gateway),
                    _ => {
                        reject(report, ConfigError::invalid_address(name, "gateway", text));
                        None
                    }
                },
                _ => None,
            };

            let mut domain = Domain::new(
                name,
                prefix.map(|prefix| IpConfig::new(prefix, gateway)),
                domain_config.use_arp,
                self.generation,
            );
            if let Some(old) = old_names.get(name).and_then(|id| self.domains.get_mut(*id)) {
                domain.stats = std::mem::take(&mut old.stats);
                if domain.has_dynamic_ip_config() && old.has_dynamic_ip_config() {
                    domain.set_ip_config(old.ip_config().copied());
                }
                if domain.ip_config() == old.ip_config() {
                    domain.arp_cache = std::mem::take(&mut old.arp_cache);
                }
            }

            let id = self.domains.insert(domain);
            self.domain_names.insert(name.to_string(), id);
            built.push((domain_config, id));
        }
        built
    }

    fn build_policies(&mut self, config: &RouterConfig, report: &mut ApplyReport) {
        let mut policies = LabelTree::new();
        for policy in &config.policies {
            if !self.domain_names.contains_key(&policy.domain) {
                reject(
                    report,
                    ConfigError::UnknownPolicyDomain {
                        label_prefix: policy.label_prefix.clone(),
                        domain: policy.domain.clone(),
                    },
                );
                continue;
            }
            if policies.insert(&policy.label_prefix, policy.domain.clone()).is_err() {
                reject(report, ConfigError::DuplicatePolicy(policy.label_prefix.clone()));
            }
        }
        self.policies = policies;
    }

    /// Installs the rules of one domain and returns how many were
    /// accepted.
    fn apply_rules(&mut self, config: &DomainConfig, id: DomainId, report: &mut ApplyReport) -> usize {
        let name = config.name.as_str();
        let mut results: Vec<(String, Result<DomainId, ConfigError>)> = Vec::new();

        for protocol in PROTOCOLS {
            for rule in config.forward_rules(protocol) {
                let result = self.add_forward_rule(id, name, protocol, rule);
                results.push((format!("{protocol} forward port {}", rule.port), result));
            }
        }
        for rule in &config.nat {
            results.push((format!("nat from {}", rule.domain), self.add_nat_rule(id, name, rule)));
        }
        for route in &config.port_routes {
            results.push((
                format!("{} port route {} for '{}'", route.protocol, route.port, route.label_prefix),
                self.add_port_route(id, name, route),
            ));
        }
        for rule in &config.ip {
            results.push((format!("ip rule {}", rule.dst), self.add_ip_rule(id, name, rule)));
        }

        let mut accepted = 0;
        for (rule, result) in results {
            match result {
                Ok(target) => {
                    if let Err(err) = self.domains.increment_ref(target) {
                        error!(domain = name, %target, %err, "Failed to reference rule target");
                    }
                    if self.settings.verbose {
                        info!(domain = name, rule, "Applied rule");
                    }
                    accepted += 1;
                }
                Err(err) => reject(report, err),
            }
        }
        accepted
    }

    fn resolve_target(&self, domain: &str, target: &str) -> Result<DomainId, ConfigError> {
        self.domain_names
            .get(target)
            .copied()
            .ok_or_else(|| ConfigError::unknown_domain(domain, target))
    }

    fn add_forward_rule(
        &mut self,
        id: DomainId,
        name: &str,
        protocol: L4Protocol,
        config: &ForwardRuleConfig,
    ) -> Result<DomainId, ConfigError> {
        let target = self.resolve_target(name, &config.domain)?;
        let to = parse_address::<Ipv4Addr>(name, "forward destination", &config.to)?;
        let duplicate = || ConfigError::duplicate_rule(name, format!("{protocol} forward rule for port {}", config.port));
        let allocator = self.port_allocator(protocol).clone();
        let domain = self
            .domains
            .get_mut(id)
            .ok_or_else(|| ConfigError::unknown_domain(name, name))?;
        if domain.forward_rules(protocol).find_by_port(config.port).is_some() {
            return Err(duplicate());
        }

        // ports inside the NAT range are pinned so that NAT never hands
        // them out while the rule exists
        let pinned = allocator.borrow().contains(config.port);
        if pinned {
            allocator
                .borrow_mut()
                .alloc_port(config.port)
                .map_err(|error| ConfigError::PortPinned {
                    domain: name.to_string(),
                    port: config.port,
                    error,
                })?;
        }

        let tree = domain.forward_rules_mut(protocol);
        let rule = ForwardRule {
            port: config.port,
            domain: target,
            to,
            to_port: config.to_port,
        };
        if tree.insert(rule).is_err() {
            if pinned {
                allocator.borrow_mut().free(config.port);
            }
            return Err(duplicate());
        }
        if pinned {
            tree.add_pin(allocator, config.port);
        }
        Ok(target)
    }

    fn add_nat_rule(&mut self, id: DomainId, name: &str, config: &NatRuleConfig) -> Result<DomainId, ConfigError> {
        let target = self.resolve_target(name, &config.domain)?;
        let rule = NatRule::new(
            target,
            self.tcp_ports.clone(),
            config.tcp_ports,
            self.udp_ports.clone(),
            config.udp_ports,
        );
        self.domains
            .get_mut(id)
            .ok_or_else(|| ConfigError::unknown_domain(name, name))?
            .nat_rules
            .insert(rule)
            .map_err(|_| ConfigError::duplicate_rule(name, format!("nat rule for domain {}", config.domain)))?;
        Ok(target)
    }

    fn add_port_route(&mut self, id: DomainId, name: &str, config: &PortRouteConfig) -> Result<DomainId, ConfigError> {
        let target = self.resolve_target(name, &config.domain)?;
        let via = config
            .via
            .as_deref()
            .map(|via| parse_address::<Ipv4Addr>(name, "port route via", via))
            .transpose()?;
        let to = config
            .to
            .as_deref()
            .map(|to| parse_address::<Ipv4Addr>(name, "port route destination", to))
            .transpose()?;
        let route = PortRoute {
            port: config.port,
            domain: target,
            via,
            to,
        };
        self.domains
            .get_mut(id)
            .ok_or_else(|| ConfigError::unknown_domain(name, name))?
            .port_routes_mut(config.protocol)
            .insert(&config.label_prefix, route)
            .map_err(|_| {
                ConfigError::duplicate_rule(
                    name,
                    format!("{} port route {} for '{}'", config.protocol, config.port, config.label_prefix),
                )
            })?;
        Ok(target)
    }

    fn add_ip_rule(&mut self, id: DomainId, name: &str, config: &IpRuleConfig) -> Result<DomainId, ConfigError> {
        let target = self.resolve_target(name, &config.domain)?;
        let dst = parse_address::<Ipv4AddressPrefix>(name, "ip rule destination", &config.dst)?;
        self.domains
            .get_mut(id)
            .ok_or_else(|| ConfigError::unknown_domain(name, name))?
            .ip_rules
            .insert(IpRule { dst, domain: target })
            .map_err(|_| ConfigError::duplicate_rule(name, format!("ip rule for {}", config.dst)))?;
        Ok(target)
    }

    /// Rebinds every interface to the domain its label selects now.
    /// Interfaces whose domain vanished or is taken stay unbound.
    fn rehome_interfaces(&mut self, old_names: &BTreeMap<String, DomainId>) {
        let mut old_bindings: BTreeMap<&str, InterfaceId> = BTreeMap::new();
        for (name, &id) in old_names {
            if let Some(interface) = self.domains.get(id).and_then(Domain::interface) {
                old_bindings.insert(name.as_str(), interface);
            }
        }

        let interfaces = self.interfaces.handles();
        for &id in &interfaces {
            self.unbind_interface_only(id);
        }
        for id in interfaces {
            let Some(label) = self.interfaces.get(id).map(|iface| iface.label().to_string()) else {
                continue;
            };
            let bound = self
                .domain_for_label(&label)
                .and_then(|domain| self.bind_interface(id, domain));
            match bound {
                Ok(()) => debug!(label, interface = %id, "Rebound interface"),
                Err(err) => warn!(label, interface = %id, %err, "Interface retired until its domain returns"),
            }
        }

        let names: Vec<(String, DomainId)> = self
            .domain_names
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        for (name, id) in names {
            let Some(domain) = self.domains.get_mut(id) else {
                continue;
            };
            if domain.interface() != old_bindings.get(name.as_str()).copied() {
                domain.arp_cache.clear();
            }
        }
    }

    /// Unbinds an interface without touching the ARP cache of its domain.
    fn unbind_interface_only(&mut self, id: InterfaceId) {
        let Some(domain) = self.interfaces.get_mut(id).and_then(|iface| iface.domain.unset()) else {
            return;
        };
        if let Some(domain) = self.domains.get_mut(domain) {
            domain.interface.unset();
        }
    }

    /// Moves the waiters of each old domain to its successor of the same
    /// name. Waiters of domains without successor are dissolved.
    fn rehome_waiters(&mut self, old_names: &BTreeMap<String, DomainId>) {
        for (name, &old) in old_names {
            let Some(domain) = self.domains.get_mut(old) else {
                continue;
            };
            let waiters = std::mem::take(&mut domain.foreign_arp_waiters);
            let Some(&new) = self.domain_names.get(name) else {
                for waiter in waiters {
                    self.dissolve_waiter(waiter);
                }
                continue;
            };

            for waiter in waiters {
                let moved = self
                    .waiters
                    .get_mut(waiter)
                    .map(|w| w.handle_config(new));
                match moved {
                    Some(Ok(_)) => {
                        if let Some(domain) = self.domains.get_mut(new) {
                            domain.foreign_arp_waiters.push_back(waiter);
                        }
                        debug!(%waiter, domain = name.as_str(), "Re-homed ARP waiter");
                    }
                    _ => self.dissolve_waiter(waiter),
                }
            }
        }
    }

    /// Keeps the links whose flow the new rules still route the same way
    /// and dissolves the others.
    fn revalidate_links(&mut self, old_names: &BTreeMap<String, DomainId>) {
        let new_ids: BTreeMap<DomainId, DomainId> = old_names
            .iter()
            .filter_map(|(name, old)| self.domain_names.get(name).map(|new| (*old, *new)))
            .collect();
        for &old in old_names.values() {
            if let Some(domain) = self.domains.get_mut(old) {
                domain.links.clear();
            }
        }

        for id in self.links.handles() {
            match self.link_successor(id, &new_ids) {
                Some((client, server)) => {
                    if let Some(link) = self.links.get_mut(id) {
                        link.client.domain = client;
                        link.server.domain = server;
                    }
                    self.index_link(id);
                }
                None => self.dissolve_link(id),
            }
        }
    }

    /// Returns the new client and server domain of a link that survives
    /// the reconfiguration. A NAT link hands its port to the new rule.
    fn link_successor(&mut self, id: LinkId, new_ids: &BTreeMap<DomainId, DomainId>) -> Option<(DomainId, DomainId)> {
        let link = self.links.get(id)?;
        let client = *new_ids.get(&link.client.domain)?;
        let server = *new_ids.get(&link.server.domain)?;
        let iface = self.interfaces.get(link.client_interface().ok()?)?;
        if iface.domain() != Some(client) {
            return None;
        }

        let protocol = link.protocol();
        let client_side = link.client.id;
        let server_side = link.server.id;
        let decision = self.route_decision(client, iface.label(), protocol, client_side.dst_ip, client_side.dst_port)?;
        if decision.domain != server
            || decision.dst_ip != server_side.src_ip
            || decision.dst_port != server_side.src_port
            || decision.via != link.server_via()
        {
            return None;
        }

        let server_domain = self.domains.get(server)?;
        let nat = server_domain.nat_rules().find_by_domain(client).is_some();
        match link.nat_port() {
            Some(_) if !nat => return None,
            None if nat => return None,
            Some(_) if server_domain.router_ip() != Some(server_side.dst_ip) => return None,
            None if server_side.dst() != client_side.src() || !decision.rewritten => return None,
            _ => {}
        }

        if let Some(port) = link.nat_port() {
            self.domains
                .get_mut(server)?
                .nat_rules
                .find_by_domain_mut(client)?
                .port_allocator_mut(protocol)
                .adopt(port)
                .ok()?;
        }
        Some((client, server))
    }

    /// Destroys the domains of the old generation.
    fn destroy_generation(&mut self, old_names: &BTreeMap<String, DomainId>) {
        for &id in old_names.values() {
            let Some(domain) = self.domains.get(id) else {
                continue;
            };
            if let Err(err) = domain.check_destroyable() {
                error!(domain = %id, %err, "Keeping domain of previous generation");
                continue;
            }
            self.domains.remove(id);
        }
    }
}
