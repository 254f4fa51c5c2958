use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dns::{DnsPacket, Proto, QueryType};

use super::{Sniffer, CHANNEL_CAPACITY};

/// The slice of a Suricata EVE record the agent cares about.
#[derive(Debug, Deserialize)]
struct EveRecord {
    timestamp: String,
    event_type: String,
    src_ip: Option<IpAddr>,
    dest_ip: Option<IpAddr>,
    dest_port: Option<u16>,
    proto: Option<String>,
    dns: Option<EveDns>,
}

#[derive(Debug, Deserialize)]
struct EveDns {
    #[serde(rename = "type")]
    kind: Option<String>,
    rrname: Option<String>,
    rrtype: Option<String>,
}

pub(super) fn spawn(path: &Path, protocols: Vec<Proto>, port: u16) -> Result<Sniffer> {
    let file =
        File::open(path).with_context(|| format!("can't open suricata log {}", path.display()))?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("error reading suricata log: {err}");
                    break;
                }
            };
            let Some(packet) = parse_record(&line, &protocols, port) else {
                continue;
            };
            if tx.blocking_send(packet).is_err() {
                break;
            }
        }
    });

    Ok(Sniffer::from_parts(rx, CancellationToken::new()))
}

fn parse_record(line: &str, protocols: &[Proto], port: u16) -> Option<DnsPacket> {
    let record: EveRecord = serde_json::from_str(line).ok()?;
    if record.event_type != "dns" {
        return None;
    }
    let dns = record.dns?;
    if dns.kind.as_deref() != Some("query") {
        return None;
    }

    let proto = match record.proto?.to_ascii_lowercase().as_str() {
        "udp" => Proto::Udp,
        "tcp" => Proto::Tcp,
        _ => return None,
    };
    if !protocols.contains(&proto) || record.dest_port? != port {
        return None;
    }

    let qtype = dns
        .rrtype
        .map_or(QueryType::Unknown(0), |t| QueryType::from_name(&t));
    Some(DnsPacket::new(
        parse_timestamp(&record.timestamp)?,
        record.src_ip?,
        record.dest_ip?,
        &dns.rrname?,
        qtype,
        proto,
    ))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    // Suricata writes zone offsets without a colon, which RFC 3339 rejects
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
