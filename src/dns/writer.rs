use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::client::Query;

use super::DnsPacket;

/// Appends query batches the API could not accept to an NDJSON file, one
/// query per line in the wire schema. The file is created with mode 0600.
///
/// Concurrent flush tasks share one writer; an internal lock serializes
/// appends so lines from different batches never interleave.
#[derive(Debug)]
pub struct FailedQueryWriter {
    file: Mutex<File>,
}

impl FailedQueryWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        Ok(Self {
            file: Mutex::new(options.open(path)?),
        })
    }

    /// Append every packet as one NDJSON line. The batch is serialized
    /// before the file lock is taken.
    pub fn write(&self, packets: &[DnsPacket]) -> io::Result<()> {
        let mut lines = String::new();
        for packet in packets {
            let row = serde_json::to_string(&Query::from(packet)).map_err(io::Error::from)?;
            lines.push_str(&row);
            lines.push('\n');
        }

        let mut file = self.lock();
        file.write_all(lines.as_bytes())?;
        file.flush()
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
