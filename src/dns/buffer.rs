use std::sync::{Mutex, MutexGuard};

use super::DnsPacket;

/// Staging area for queries awaiting a flush. `buffer_size` from the
/// configuration is a flush trigger, not a cap: writes always succeed.
///
/// One exclusive lock serializes all operations; nothing does I/O while
/// holding it.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    packets: Mutex<Vec<DnsPacket>>,
}

impl PacketBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append packets, returning how many were added and the new length.
    pub fn write(&self, packets: Vec<DnsPacket>) -> (usize, usize) {
        let mut buf = self.lock();
        let added = packets.len();
        buf.extend(packets);
        (added, buf.len())
    }

    /// Atomically take everything currently buffered, leaving it empty.
    pub fn drain(&self) -> Vec<DnsPacket> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DnsPacket>> {
        match self.packets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
