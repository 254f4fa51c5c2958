mod bro;
mod parse;
mod suricata;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use pcap::{Activated, Capture, Device};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dns::{DnsPacket, Proto};

const CHANNEL_CAPACITY: usize = 10000;

/// Offline source kinds accepted by `send --format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Pcap,
    Bro,
    Suricata,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pcap => "pcap",
            Self::Bro => "bro",
            Self::Suricata => "suricata",
        }
    }
}

/// A running packet source feeding the ingestion loop.
///
/// Every variant produces the same thing: a channel of parsed DNS requests
/// that closes when the source is exhausted, fails mid-stream, or is
/// stopped. Live capture is infinite; the file-backed sources end at EOF.
pub struct Sniffer {
    rx: mpsc::Receiver<DnsPacket>,
    stop: CancellationToken,
}

impl Sniffer {
    /// Capture DNS requests on a named network interface.
    pub fn live(interface: &str, protocols: &[Proto], port: u16) -> Result<Self> {
        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .with_context(|| format!("can't open {interface} interface: no such device"))?;

        let mut capture = Capture::from_device(device)?
            .immediate_mode(true)
            .timeout(100)
            .open()
            .with_context(|| format!("can't open {interface} interface"))?;
        capture.filter(&bpf_filter(protocols, port), true)?;
        info!("capture started on interface {interface}");

        Ok(Self::spawn_capture(capture, protocols.to_vec(), port))
    }

    /// Replay DNS requests from a capture file.
    pub fn offline_pcap(path: &Path, protocols: &[Proto], port: u16) -> Result<Self> {
        let capture = Capture::from_file(path)
            .with_context(|| format!("can't open pcap file {}", path.display()))?;
        Ok(Self::spawn_capture(capture, protocols.to_vec(), port))
    }

    /// Read DNS records from a Bro/Zeek dns.log file.
    pub fn bro(path: &Path, protocols: &[Proto], port: u16) -> Result<Self> {
        bro::spawn(path, protocols.to_vec(), port)
    }

    /// Read DNS records from a Suricata eve.json file.
    pub fn suricata(path: &Path, protocols: &[Proto], port: u16) -> Result<Self> {
        suricata::spawn(path, protocols.to_vec(), port)
    }

    pub async fn recv(&mut self) -> Option<DnsPacket> {
        self.rx.recv().await
    }

    /// Stop a live capture; the channel closes shortly after.
    #[allow(dead_code)] // SIGINT currently exits the process instead
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub(super) fn from_parts(rx: mpsc::Receiver<DnsPacket>, stop: CancellationToken) -> Self {
        Self { rx, stop }
    }

    fn spawn_capture<T>(mut capture: Capture<T>, protocols: Vec<Proto>, port: u16) -> Self
    where
        T: Activated + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = CancellationToken::new();

        // pcap reads block, so cancellation is bridged to a flag the
        // capture loop checks between reads.
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&should_stop);
        let token = stop.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            stop_flag.store(true, Ordering::Relaxed);
        });

        tokio::task::spawn_blocking(move || {
            while !should_stop.load(Ordering::Relaxed) {
                match capture.next_packet() {
                    Ok(packet) => {
                        let nanos = (packet.header.ts.tv_usec.clamp(0, 999_999) as u32) * 1000;
                        let timestamp = DateTime::from_timestamp(packet.header.ts.tv_sec as i64, nanos)
                            .unwrap_or_else(Utc::now);
                        if let Some(parsed) =
                            parse::parse_packet(packet.data, timestamp, &protocols, port)
                        {
                            if tx.blocking_send(parsed).is_err() {
                                info!("channel closed, stopping capture");
                                break;
                            }
                        }
                    }
                    // Read timeout on a live handle: loop back to check the stop flag
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(pcap::Error::NoMorePackets) => break,
                    Err(err) => {
                        warn!("error reading packet: {err}");
                        break;
                    }
                }
            }
        });

        Self { rx, stop }
    }
}

/// List capture devices for `--list-interfaces`.
pub fn list_interfaces() -> Result<Vec<Device>> {
    Ok(Device::list()?)
}

fn bpf_filter(protocols: &[Proto], port: u16) -> String {
    protocols
        .iter()
        .map(|p| format!("{p} port {port}"))
        .collect::<Vec<_>>()
        .join(" or ")
}
