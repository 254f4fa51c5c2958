use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::dns::{DnsPacket, Proto, QueryType};

const UDP_PROTOCOL: u8 = 17;
const TCP_PROTOCOL: u8 = 6;

/// Decode one link-layer frame into a DNS request, applying the transport
/// and destination-port filter. Responses and non-DNS traffic yield None.
///
/// Layers: Ethernet (RFC 894), IPv4/IPv6 (RFC 791/2460), UDP/TCP
/// (RFC 768/793), DNS (RFC 1035).
pub(super) fn parse_packet(
    data: &[u8],
    timestamp: DateTime<Utc>,
    protocols: &[Proto],
    port: u16,
) -> Option<DnsPacket> {
    // Ethernet frame: two MACs then the EtherType (0x0800 IPv4, 0x86DD IPv6)
    if data.len() < 14 {
        return None;
    }
    let eth_type = u16::from_be_bytes([data[12], data[13]]);
    let mut offset = 14;

    let (src_ip, dst_ip, ip_protocol, ip_header_len) = match eth_type {
        0x0800 => parse_ipv4(&data[offset..])?,
        0x86DD => parse_ipv6(&data[offset..])?,
        _ => return None,
    };
    offset += ip_header_len;

    match ip_protocol {
        UDP_PROTOCOL if protocols.contains(&Proto::Udp) => {
            // UDP header: src port, dst port, length, checksum
            if data.len() < offset + 8 {
                return None;
            }
            let dst_port = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
            if dst_port != port {
                return None;
            }
            parse_dns_request(&data[offset + 8..], timestamp, src_ip, dst_ip, Proto::Udp)
        }
        TCP_PROTOCOL if protocols.contains(&Proto::Tcp) => {
            if data.len() < offset + 20 {
                return None;
            }
            let dst_port = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
            if dst_port != port {
                return None;
            }
            let header_len = ((data[offset + 12] >> 4) as usize) * 4;
            if header_len < 20 || data.len() < offset + header_len {
                return None;
            }
            let payload = &data[offset + header_len..];
            // DNS over TCP carries a two-byte message length prefix.
            if payload.len() < 2 {
                return None;
            }
            parse_dns_request(&payload[2..], timestamp, src_ip, dst_ip, Proto::Tcp)
        }
        _ => None,
    }
}

/// Returns (source IP, destination IP, transport protocol, header length).
fn parse_ipv4(data: &[u8]) -> Option<(IpAddr, IpAddr, u8, usize)> {
    if data.len() < 20 {
        return None;
    }
    // IHL is in 32-bit words
    let ihl = (data[0] & 0x0F) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }
    let src: [u8; 4] = data[12..16].try_into().ok()?;
    let dst: [u8; 4] = data[16..20].try_into().ok()?;
    Some((IpAddr::from(src), IpAddr::from(dst), data[9], ihl))
}

fn parse_ipv6(data: &[u8]) -> Option<(IpAddr, IpAddr, u8, usize)> {
    if data.len() < 40 {
        return None;
    }
    let src: [u8; 16] = data[8..24].try_into().ok()?;
    let dst: [u8; 16] = data[24..40].try_into().ok()?;
    // Extension headers are not chased; the next header must be the transport.
    Some((IpAddr::from(src), IpAddr::from(dst), data[6], 40))
}

/// Parse a DNS message, keeping it only when it is a request (QR bit clear)
/// with at least one question (RFC 1035 Section 4.1.1).
fn parse_dns_request(
    data: &[u8],
    timestamp: DateTime<Utc>,
    src_ip: IpAddr,
    dst_ip: IpAddr,
    proto: Proto,
) -> Option<DnsPacket> {
    if data.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([data[2], data[3]]);
    if flags & 0x8000 != 0 {
        // QR bit set: a response
        return None;
    }
    let qd_count = u16::from_be_bytes([data[4], data[5]]);
    if qd_count == 0 {
        return None;
    }

    let mut offset = 12;
    let domain = parse_domain_name(data, &mut offset)?;
    if offset + 4 > data.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([data[offset], data[offset + 1]]);

    let fqdn = String::from_utf8_lossy(&domain);
    if fqdn.is_empty() {
        return None;
    }
    Some(DnsPacket::new(
        timestamp,
        src_ip,
        dst_ip,
        &fqdn,
        QueryType::from_u16(qtype),
        proto,
    ))
}

/// Parse a DNS domain name with compression support (RFC 1035 Section
/// 4.1.4). Labels are capped at 63 octets, names at 253, and pointer
/// chains at 10 jumps.
fn parse_domain_name(data: &[u8], offset: &mut usize) -> Option<Bytes> {
    let mut domain = Vec::new();
    let mut jumped = false;
    let mut jump_offset = 0;
    let max_jumps = 10;
    let mut jump_count = 0;

    loop {
        if *offset >= data.len() {
            return None;
        }

        let len = data[*offset] as usize;
        if len == 0 {
            if !jumped {
                *offset += 1;
            }
            break;
        }

        // Top two bits set: a 14-bit pointer into the message
        if (len & 0xC0) == 0xC0 {
            if *offset + 1 >= data.len() {
                return None;
            }
            if !jumped {
                jump_offset = *offset + 2;
                jumped = true;
            }
            jump_count += 1;
            if jump_count > max_jumps {
                return None;
            }
            *offset = ((len & 0x3F) << 8) | (data[*offset + 1] as usize);
            continue;
        }

        if len > 63 {
            return None;
        }
        *offset += 1;

        if !domain.is_empty() {
            domain.push(b'.');
        }
        if *offset + len > data.len() {
            return None;
        }
        domain.extend_from_slice(&data[*offset..*offset + len]);
        *offset += len;

        if domain.len() > 253 {
            break;
        }
    }

    if jumped {
        *offset = jump_offset;
    }
    Some(Bytes::from(domain))
}
