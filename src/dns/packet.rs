use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// DNS query types carried in the question section (RFC 1035 Section 3.2.2, RFC 3596)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// A record: IPv4 address (32 bits)
    A,
    /// NS record: Authoritative name server
    Ns,
    /// CNAME record: Canonical name for an alias
    Cname,
    /// SOA record: Start of authority
    Soa,
    /// PTR record: Domain name pointer
    Ptr,
    /// MX record: Mail exchange
    Mx,
    /// TXT record: Text strings
    Txt,
    /// AAAA record: IPv6 address (128 bits) - RFC 3596
    Aaaa,
    /// SRV record: Service location - RFC 2782
    Srv,
    /// HTTPS record: HTTPS binding - RFC 9460
    Https,
    /// Unknown or unsupported record type
    Unknown(u16),
}

impl QueryType {
    /// Convert wire format u16 to `QueryType`
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            65 => Self::Https,
            n => Self::Unknown(n),
        }
    }

    /// Parse a textual type as found in Bro/Suricata logs ("A", "AAAA", "TYPE257")
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "A" => Self::A,
            "NS" => Self::Ns,
            "CNAME" => Self::Cname,
            "SOA" => Self::Soa,
            "PTR" => Self::Ptr,
            "MX" => Self::Mx,
            "TXT" => Self::Txt,
            "AAAA" => Self::Aaaa,
            "SRV" => Self::Srv,
            "HTTPS" => Self::Https,
            other => other
                .strip_prefix("TYPE")
                .and_then(|n| n.parse().ok())
                .map_or(Self::Unknown(0), Self::Unknown),
        }
    }

    /// Get human-readable name for the record type
    pub fn name(self) -> String {
        match self {
            Self::A => "A".to_string(),
            Self::Ns => "NS".to_string(),
            Self::Cname => "CNAME".to_string(),
            Self::Soa => "SOA".to_string(),
            Self::Ptr => "PTR".to_string(),
            Self::Mx => "MX".to_string(),
            Self::Txt => "TXT".to_string(),
            Self::Aaaa => "AAAA".to_string(),
            Self::Srv => "SRV".to_string(),
            Self::Https => "HTTPS".to_string(),
            Self::Unknown(n) => format!("TYPE{n}"),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Transport protocol a query was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Udp,
    Tcp,
}

impl Proto {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed DNS request. Immutable once constructed; the domain is
/// stored in canonical form (lowercase, no trailing dot).
#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub fqdn: String,
    pub qtype: QueryType,
    pub proto: Proto,
}

impl DnsPacket {
    pub fn new(
        timestamp: DateTime<Utc>,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        fqdn: &str,
        qtype: QueryType,
        proto: Proto,
    ) -> Self {
        Self {
            timestamp,
            src_ip,
            dst_ip,
            fqdn: canonical_fqdn(fqdn),
            qtype,
            proto,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(fqdn: &str, src_ip: &str) -> Self {
        Self::new(
            Utc::now(),
            src_ip.parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
            fqdn,
            QueryType::A,
            Proto::Udp,
        )
    }
}

impl fmt::Display for DnsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {}", self.fqdn, self.qtype, self.src_ip)
    }
}

/// Lowercase a domain name and strip the trailing dot.
pub fn canonical_fqdn(domain: &str) -> String {
    domain.trim_end_matches('.').to_lowercase()
}
