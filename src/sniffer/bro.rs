use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::DateTime;
use log::warn;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dns::{DnsPacket, Proto, QueryType};

use super::{Sniffer, CHANNEL_CAPACITY};

/// Column indexes for the dns.log fields the agent needs. Zeek names its
/// columns in a `#fields` header; without one the stock layout is assumed.
#[derive(Debug, Clone)]
struct FieldMap {
    ts: usize,
    orig_h: usize,
    resp_h: usize,
    resp_p: usize,
    proto: usize,
    query: usize,
    qtype_name: usize,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            ts: 0,
            orig_h: 2,
            resp_h: 4,
            resp_p: 5,
            proto: 6,
            query: 9,
            qtype_name: 13,
        }
    }
}

impl FieldMap {
    fn from_header(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("#fields")?;
        let names: Vec<&str> = rest.trim().split('\t').collect();
        let index = |name: &str| names.iter().position(|n| *n == name);
        Some(Self {
            ts: index("ts")?,
            orig_h: index("id.orig_h")?,
            resp_h: index("id.resp_h")?,
            resp_p: index("id.resp_p")?,
            proto: index("proto")?,
            query: index("query")?,
            qtype_name: index("qtype_name")?,
        })
    }
}

pub(super) fn spawn(path: &Path, protocols: Vec<Proto>, port: u16) -> Result<Sniffer> {
    let file =
        File::open(path).with_context(|| format!("can't open bro log {}", path.display()))?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let mut fields = FieldMap::default();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("error reading bro log: {err}");
                    break;
                }
            };
            if line.starts_with('#') {
                if let Some(map) = FieldMap::from_header(&line) {
                    fields = map;
                }
                continue;
            }
            let Some(packet) = parse_record(&fields, &line, &protocols, port) else {
                continue;
            };
            if tx.blocking_send(packet).is_err() {
                break;
            }
        }
    });

    Ok(Sniffer::from_parts(rx, CancellationToken::new()))
}

fn parse_record(
    fields: &FieldMap,
    line: &str,
    protocols: &[Proto],
    port: u16,
) -> Option<DnsPacket> {
    let columns: Vec<&str> = line.split('\t').collect();
    // Zeek writes "-" for unset fields
    let get = |i: usize| columns.get(i).copied().filter(|v| *v != "-");

    let proto = match get(fields.proto)? {
        "udp" => Proto::Udp,
        "tcp" => Proto::Tcp,
        _ => return None,
    };
    let resp_p: u16 = get(fields.resp_p)?.parse().ok()?;
    if !protocols.contains(&proto) || resp_p != port {
        return None;
    }

    let ts: f64 = get(fields.ts)?.parse().ok()?;
    let timestamp = DateTime::from_timestamp(ts.trunc() as i64, (ts.fract() * 1e9) as u32)?;

    Some(DnsPacket::new(
        timestamp,
        get(fields.orig_h)?.parse().ok()?,
        get(fields.resp_h)?.parse().ok()?,
        get(fields.query)?,
        QueryType::from_name(get(fields.qtype_name)?),
        proto,
    ))
}
