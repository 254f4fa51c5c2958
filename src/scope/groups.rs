use std::collections::HashSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use thiserror::Error;

use crate::dns::canonical_fqdn;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group {group}: invalid network {network}: {source}")]
    InvalidNetwork {
        group: String,
        network: String,
        source: ipnetwork::IpNetworkError,
    },

    #[error("duplicate group name {0}")]
    DuplicateGroup(String),
}

/// A named scope rule as it appears in the configuration. Source IPs inside
/// `includes` and outside `excludes` belong to the group; `domains` lists
/// the queries the group refuses to forward.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub domains: Vec<String>,
}

#[derive(Debug)]
struct CompiledGroup {
    name: String,
    includes: Vec<IpNetwork>,
    excludes: Vec<IpNetwork>,
    domains: HashSet<String>,
}

impl CompiledGroup {
    fn covers(&self, ip: IpAddr) -> bool {
        self.includes.iter().any(|n| n.contains(ip))
            && !self.excludes.iter().any(|n| n.contains(ip))
    }
}

/// Ordered set of scope groups. Built once from configuration at startup
/// and immutable afterwards; every CIDR must parse or construction fails.
#[derive(Debug, Default)]
pub struct Groups {
    groups: Vec<CompiledGroup>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: Group) -> Result<(), GroupError> {
        if self.groups.iter().any(|g| g.name == group.name) {
            return Err(GroupError::DuplicateGroup(group.name));
        }

        let includes = parse_networks(&group.name, &group.includes)?;
        let excludes = parse_networks(&group.name, &group.excludes)?;
        self.groups.push(CompiledGroup {
            includes,
            excludes,
            domains: group.domains.iter().map(|d| canonical_fqdn(d)).collect(),
            name: group.name,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Decide whether a query should be forwarded. A query passes when at
    /// least one group covers its source IP and does not list its domain.
    ///
    /// The returned name is the first allowing group; on denial it is the
    /// group that covered the IP but blocked the domain, if any. Either way
    /// it is only used for logging. An empty set allows everything: the
    /// agent is deployed first, scope is tuned later.
    pub fn is_whitelisted(&self, domain: &str, src_ip: IpAddr) -> (Option<&str>, bool) {
        if self.groups.is_empty() {
            return (None, true);
        }

        // IPv4-mapped IPv6 sources must match IPv4 networks.
        let ip = canonical_ip(src_ip);
        let domain = canonical_fqdn(domain);

        let mut blocked_by = None;
        for group in &self.groups {
            if !group.covers(ip) {
                continue;
            }
            if group.domains.contains(&domain) {
                blocked_by = Some(group.name.as_str());
                continue;
            }
            return (Some(group.name.as_str()), true);
        }
        (blocked_by, false)
    }
}

fn parse_networks(group: &str, networks: &[String]) -> Result<Vec<IpNetwork>, GroupError> {
    networks
        .iter()
        .map(|n| {
            n.parse().map_err(|source| GroupError::InvalidNetwork {
                group: group.to_string(),
                network: n.clone(),
                source,
            })
        })
        .collect()
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}
