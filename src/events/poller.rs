use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info};
use thiserror::Error;

use crate::client::Client;

use super::JsonFileWriter;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("can't read follow file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    // Refusing to start beats silently re-emitting every event.
    #[error("follow file {} is corrupt", path.display())]
    Corrupt { path: PathBuf },
}

/// Polls the analytics API for produced events and persists them locally.
///
/// The follow cursor is written to disk strictly after the events it names
/// have been written, so a crash at any point replays events instead of
/// losing them.
pub struct Poller<C> {
    client: Arc<C>,
    writer: JsonFileWriter,
    follow_file: Option<PathBuf>,
    cursor: Option<String>,
}

impl<C: Client> Poller<C> {
    pub fn new(client: Arc<C>, writer: JsonFileWriter) -> Self {
        Self {
            client,
            writer,
            follow_file: None,
            cursor: None,
        }
    }

    /// Load the persisted cursor and remember where to checkpoint it. A
    /// missing or empty file means no cursor yet; anything unreadable as a
    /// single token is a fatal construction error.
    pub fn set_follow_file(&mut self, path: PathBuf) -> Result<(), FollowError> {
        self.cursor = match fs::read(&path) {
            Ok(bytes) => parse_cursor(&bytes).ok_or(FollowError::Corrupt { path: path.clone() })?,
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(source) => {
                return Err(FollowError::Read {
                    path,
                    source,
                })
            }
        };
        self.follow_file = Some(path);
        Ok(())
    }

    /// One poll round trip: fetch, append to the events file, checkpoint
    /// the cursor. The cursor only moves when everything before it worked.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let response = self
            .client
            .events(self.cursor.as_deref())
            .await
            .context("events request failed")?;

        if response.events.is_empty() {
            return Ok(0);
        }

        for event in &response.events {
            self.writer.write(event).context("can't write event")?;
        }

        if let Some(next) = response.next_cursor {
            self.save_cursor(&next)
                .context("can't persist follow cursor")?;
            self.cursor = Some(next);
        }
        Ok(response.events.len())
    }

    fn save_cursor(&self, cursor: &str) -> std::io::Result<()> {
        let Some(path) = &self.follow_file else {
            return Ok(());
        };
        // Write-temp then rename so the file is never half a cursor.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, format!("{cursor}\n"))?;
        fs::rename(&tmp, path)
    }

    /// Perpetual poll loop. Errors are logged and retried after the
    /// interval; there is no retry limit by design.
    pub async fn run(mut self, interval: Duration) {
        loop {
            match self.poll_once().await {
                Ok(0) => debug!("no new events"),
                Ok(count) => info!("{count} events written to file"),
                Err(err) => error!("event poll failed: {err:#}"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn parse_cursor(bytes: &[u8]) -> Option<Option<String>> {
    let content = std::str::from_utf8(bytes).ok()?;
    let cursor = content.trim();
    if cursor.is_empty() {
        return Some(None);
    }
    if cursor.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    Some(Some(cursor.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use crate::client::mock::MockClient;
    use crate::client::EventsResponse;

    use super::*;

    fn poller_at(
        dir: &std::path::Path,
        client: Arc<MockClient>,
    ) -> (Poller<MockClient>, PathBuf, PathBuf) {
        let events_file = dir.join("events.ndjson");
        let follow_file = dir.join("follow");
        let writer = JsonFileWriter::create(&events_file).unwrap();
        let mut poller = Poller::new(client, writer);
        poller.set_follow_file(follow_file.clone()).unwrap();
        (poller, events_file, follow_file)
    }

    #[tokio::test]
    async fn events_persist_before_cursor_advances() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockClient::new());
        client.push_events(EventsResponse {
            events: vec![json!({"type": "c2"}), json!({"type": "dga"})],
            next_cursor: Some("42".to_string()),
        });
        let (mut poller, events_file, follow_file) = poller_at(dir.path(), Arc::clone(&client));

        assert_eq!(poller.poll_once().await.unwrap(), 2);

        assert_eq!(fs::read_to_string(&events_file).unwrap().lines().count(), 2);
        assert_eq!(fs::read_to_string(&follow_file).unwrap().trim(), "42");

        // The next round trip carries the new cursor.
        poller.poll_once().await.unwrap();
        let calls = client.follow_calls.lock().unwrap();
        assert_eq!(calls[0], None);
        assert_eq!(calls[1].as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn empty_batch_leaves_cursor_alone() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockClient::new());
        let (mut poller, events_file, follow_file) = poller_at(dir.path(), client);

        assert_eq!(poller.poll_once().await.unwrap(), 0);
        assert!(fs::read_to_string(&events_file).unwrap().is_empty());
        assert!(!follow_file.exists());
    }

    #[tokio::test]
    async fn api_failure_keeps_old_cursor() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("follow"), "7\n").unwrap();
        let client = Arc::new(MockClient::failing());
        let (mut poller, _, follow_file) = poller_at(dir.path(), Arc::clone(&client));

        assert!(poller.poll_once().await.is_err());
        assert_eq!(fs::read_to_string(&follow_file).unwrap().trim(), "7");

        // After the API recovers, polling resumes from the same cursor.
        client.set_fail(false);
        poller.poll_once().await.unwrap();
        let calls = client.follow_calls.lock().unwrap();
        assert_eq!(calls[0].as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_cursor() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("follow"), "1499299678\n").unwrap();
        let client = Arc::new(MockClient::new());
        let (mut poller, _, _) = poller_at(dir.path(), Arc::clone(&client));

        poller.poll_once().await.unwrap();
        let calls = client.follow_calls.lock().unwrap();
        assert_eq!(calls[0].as_deref(), Some("1499299678"));
    }

    #[test]
    fn corrupt_follow_file_refuses_to_start() {
        let dir = tempdir().unwrap();
        let follow_file = dir.path().join("follow");
        fs::write(&follow_file, [0xff, 0xfe, 0x00]).unwrap();

        let writer = JsonFileWriter::create(&dir.path().join("events.ndjson")).unwrap();
        let mut poller = Poller::new(Arc::new(MockClient::new()), writer);
        let err = poller.set_follow_file(follow_file).unwrap_err();
        assert!(matches!(err, FollowError::Corrupt { .. }));
    }

    #[test]
    fn multi_token_follow_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let follow_file = dir.path().join("follow");
        fs::write(&follow_file, "42\n43\n").unwrap();

        let writer = JsonFileWriter::create(&dir.path().join("events.ndjson")).unwrap();
        let mut poller = Poller::new(Arc::new(MockClient::new()), writer);
        assert!(poller.set_follow_file(follow_file).is_err());
    }

    #[test]
    fn missing_or_empty_follow_file_means_no_cursor() {
        let dir = tempdir().unwrap();
        let writer = JsonFileWriter::create(&dir.path().join("events.ndjson")).unwrap();
        let mut poller = Poller::new(Arc::new(MockClient::new()), writer);
        poller.set_follow_file(dir.path().join("follow")).unwrap();
        assert!(poller.cursor.is_none());

        fs::write(dir.path().join("empty"), "\n").unwrap();
        poller.set_follow_file(dir.path().join("empty")).unwrap();
        assert!(poller.cursor.is_none());
    }
}
