use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use tokio::time::MissedTickBehavior;

use crate::client::{Client, QueriesRequest};
use crate::config::{Config, ScopeConfig};
use crate::dns::{DnsPacket, FailedQueryWriter, PacketBuffer};
use crate::events::{JsonFileWriter, Poller};
use crate::scope::{Group, GroupError, Groups};
use crate::sniffer::{Format, Sniffer};

/// Owns the pipeline: sniffer -> scope filter -> buffer -> API, plus the
/// event poller running alongside.
pub struct Executor<C> {
    client: Arc<C>,
    config: Config,
    groups: Groups,
    buffer: Arc<PacketBuffer>,
    spill: Option<Arc<FailedQueryWriter>>,
    // Taken by start(); offline runs leave it in place.
    poller: Option<Poller<C>>,
}

impl<C: Client + 'static> Executor<C> {
    /// Wire up the pipeline. Invalid scope groups, an unopenable events
    /// file, or a corrupt follow file all refuse to start.
    pub fn new(client: Arc<C>, config: Config) -> Result<Self> {
        let groups = build_groups(&config.scope)?;

        let writer = JsonFileWriter::create(&config.events.file).with_context(|| {
            format!("can't open events file {}", config.events.file.display())
        })?;
        let mut poller = Poller::new(Arc::clone(&client), writer);
        poller.set_follow_file(config.data.file.clone())?;

        let spill = match &config.queries.failed_file {
            Some(path) => Some(Arc::new(FailedQueryWriter::create(path).with_context(
                || format!("can't open failed queries file {}", path.display()),
            )?)),
            None => None,
        };

        Ok(Self {
            client,
            config,
            groups,
            buffer: Arc::new(PacketBuffer::new()),
            spill,
            poller: Some(poller),
        })
    }

    /// Live mode: capture from the configured interface, with the event
    /// poller and the periodic flush running in the background.
    pub async fn start(&mut self) -> Result<()> {
        let network = &self.config.network;
        if network.interface.is_empty() {
            bail!("network.interface must be set for live capture");
        }
        info!(
            "creating sniffer for {} interface, port {}, protocols {:?}",
            network.interface, network.port, network.protocols
        );
        let sniffer = Sniffer::live(&network.interface, &network.protocols, network.port)?;

        if let Some(spill) = &self.spill {
            spawn_signal_handler(Arc::clone(&self.buffer), Arc::clone(spill));
        }
        if let Some(poller) = self.poller.take() {
            tokio::spawn(poller.run(self.config.poll_interval()));
        }
        self.spawn_time_flush();

        self.run(sniffer).await
    }

    /// Offline mode: forward queries from a capture or log file.
    pub async fn send(&mut self, format: Format, file: &Path) -> Result<()> {
        info!("creating sniffer for {} file {}", format.as_str(), file.display());
        let network = &self.config.network;
        let sniffer = match format {
            Format::Pcap => Sniffer::offline_pcap(file, &network.protocols, network.port)?,
            Format::Bro => Sniffer::bro(file, &network.protocols, network.port)?,
            Format::Suricata => Sniffer::suricata(file, &network.protocols, network.port)?,
        };
        self.run(sniffer).await
    }

    /// Ingestion loop: filter, buffer, flush on size without ever stalling
    /// the read, then flush whatever is left when the source ends.
    async fn run(&mut self, mut sniffer: Sniffer) -> Result<()> {
        while let Some(packet) = sniffer.recv().await {
            if !self.should_send(&packet) {
                continue;
            }
            debug!("add dns query {packet} to sending buffer");
            let (_, len) = self.buffer.write(vec![packet]);
            if len < self.config.queries.buffer_size {
                continue;
            }

            let client = Arc::clone(&self.client);
            let buffer = Arc::clone(&self.buffer);
            let spill = self.spill.clone();
            tokio::spawn(async move {
                flush_once(&*client, &buffer, spill.as_deref()).await;
            });
        }

        flush_once(&*self.client, &self.buffer, self.spill.as_deref()).await;
        Ok(())
    }

    fn should_send(&self, packet: &DnsPacket) -> bool {
        // no scope groups configured
        if self.groups.is_empty() {
            return true;
        }
        let (name, allowed) = self.groups.is_whitelisted(&packet.fqdn, packet.src_ip);
        if !allowed {
            match name {
                Some(name) => debug!("dns query {packet} excluded by {name} group"),
                None => debug!("dns query {packet} outside all scope groups"),
            }
        }
        allowed
    }

    fn spawn_time_flush(&self) {
        let client = Arc::clone(&self.client);
        let buffer = Arc::clone(&self.buffer);
        let spill = self.spill.clone();
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                if buffer.is_empty() {
                    continue;
                }
                flush_once(&*client, &buffer, spill.as_deref()).await;
            }
        });
    }
}

/// Drain the buffer and submit the batch. Every drained packet ends up
/// delivered to the API, captured in the spill file, or back in the buffer.
async fn flush_once<C: Client>(
    client: &C,
    buffer: &PacketBuffer,
    spill: Option<&FailedQueryWriter>,
) {
    let packets = buffer.drain();
    if packets.is_empty() {
        return;
    }

    info!("sending {} dns queries to analyze", packets.len());
    let request = QueriesRequest::from_packets(&packets);
    match client.send_queries(&request).await {
        Ok(response) => {
            if response.accepted == response.received {
                info!("{} dns queries were successfully sent", response.accepted);
            } else {
                info!(
                    "{} of {} dns queries were sent - rejected reasons {:?}",
                    response.accepted, response.received, response.rejected
                );
            }
        }
        Err(err) => {
            error!("sending queries failed: {err}");
            if let Some(writer) = spill {
                match writer.write(&packets) {
                    Ok(()) => {
                        info!("{} dns queries written to file", packets.len());
                        return;
                    }
                    Err(err) => warn!("can't write queries to file: {err}"),
                }
            }
            // keep unsaved packets for a later flush
            buffer.write(packets);
        }
    }
}

/// SIGINT drains the buffer into the spill file and exits nonzero. Without
/// a spill writer the handler is not installed and default termination
/// semantics apply.
fn spawn_signal_handler(buffer: Arc<PacketBuffer>, spill: Arc<FailedQueryWriter>) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("can't install signal handler: {err}");
            return;
        }
        let packets = buffer.drain();
        match spill.write(&packets) {
            Ok(()) => info!("{} queries written to file", packets.len()),
            Err(err) => warn!("can't write queries to file: {err}"),
        }
        process::exit(1);
    });
}

fn build_groups(scope: &ScopeConfig) -> Result<Groups, GroupError> {
    let mut groups = Groups::new();
    if scope.groups.is_empty() {
        return Ok(groups);
    }
    for (name, group) in &scope.groups {
        groups.add(Group {
            name: name.clone(),
            includes: group.networks.clone(),
            excludes: group.exclude.networks.clone(),
            domains: group.exclude.domains.clone(),
        })?;
    }
    info!("found {} scope groups", groups.len());
    Ok(groups)
}
