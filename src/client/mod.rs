mod api;

pub use api::ApiClient;

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dns::DnsPacket;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("api request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("api returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// One query row in the wire format shared by the queries endpoint and the
/// failed-queries spill file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub ts: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub fqdn: String,
    pub qtype: String,
    pub proto: String,
}

impl From<&DnsPacket> for Query {
    fn from(packet: &DnsPacket) -> Self {
        Self {
            ts: packet.timestamp,
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            fqdn: packet.fqdn.clone(),
            qtype: packet.qtype.name(),
            proto: packet.proto.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueriesRequest {
    pub queries: Vec<Query>,
}

impl QueriesRequest {
    pub fn from_packets(packets: &[DnsPacket]) -> Self {
        Self {
            queries: packets.iter().map(Query::from).collect(),
        }
    }
}

/// Server reply to a batch submission. `accepted <= received`; `rejected`
/// maps a reason to the number of queries it dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueriesResponse {
    pub received: u64,
    pub accepted: u64,
    #[serde(default)]
    pub rejected: HashMap<String, u64>,
}

/// Events produced by the analytics service since the given follow cursor.
/// Event schemas are server-defined and passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Analytics API surface used by the executor and the event poller.
#[async_trait]
pub trait Client: Send + Sync {
    async fn send_queries(&self, request: &QueriesRequest) -> Result<QueriesResponse, ClientError>;

    async fn events(&self, follow: Option<&str>) -> Result<EventsResponse, ClientError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory [`Client`] recording every call it receives.
    #[derive(Default)]
    pub struct MockClient {
        fail: AtomicBool,
        pub sent: Mutex<Vec<QueriesRequest>>,
        pub follow_calls: Mutex<Vec<Option<String>>>,
        pub event_batches: Mutex<VecDeque<EventsResponse>>,
    }

    impl MockClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let client = Self::default();
            client.fail.store(true, Ordering::Relaxed);
            client
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::Relaxed);
        }

        pub fn push_events(&self, batch: EventsResponse) {
            self.event_batches.lock().unwrap().push_back(batch);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn sent_queries(&self) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.queries.len())
                .sum()
        }
    }

    #[async_trait]
    impl Client for MockClient {
        async fn send_queries(
            &self,
            request: &QueriesRequest,
        ) -> Result<QueriesResponse, ClientError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(ClientError::Status {
                    status: 500,
                    body: "internal server error".to_string(),
                });
            }
            let count = request.queries.len() as u64;
            self.sent.lock().unwrap().push(request.clone());
            Ok(QueriesResponse {
                received: count,
                accepted: count,
                rejected: HashMap::new(),
            })
        }

        async fn events(&self, follow: Option<&str>) -> Result<EventsResponse, ClientError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(ClientError::Status {
                    status: 503,
                    body: "service unavailable".to_string(),
                });
            }
            self.follow_calls
                .lock()
                .unwrap()
                .push(follow.map(str::to_string));
            Ok(self
                .event_batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_row_uses_wire_field_names() {
        let packet = DnsPacket::for_tests("example.com", "10.0.0.1");
        let value = serde_json::to_value(Query::from(&packet)).unwrap();

        assert_eq!(value["fqdn"], "example.com");
        assert_eq!(value["src_ip"], "10.0.0.1");
        assert_eq!(value["dst_ip"], "8.8.8.8");
        assert_eq!(value["qtype"], "A");
        assert_eq!(value["proto"], "udp");
        assert!(value["ts"].is_string());
    }

    #[test]
    fn queries_response_parses_rejection_reasons() {
        let response: QueriesResponse = serde_json::from_str(
            r#"{"received": 10, "accepted": 8, "rejected": {"out_of_scope": 2}}"#,
        )
        .unwrap();
        assert_eq!(response.received, 10);
        assert_eq!(response.accepted, 8);
        assert_eq!(response.rejected["out_of_scope"], 2);
    }

    #[test]
    fn queries_response_rejected_defaults_to_empty() {
        let response: QueriesResponse =
            serde_json::from_str(r#"{"received": 3, "accepted": 3}"#).unwrap();
        assert!(response.rejected.is_empty());
    }

    #[test]
    fn events_response_tolerates_missing_fields() {
        let response: EventsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.events.is_empty());
        assert!(response.next_cursor.is_none());

        let response: EventsResponse =
            serde_json::from_str(r#"{"events": [{"flags": ["c2"]}], "next_cursor": "42"}"#)
                .unwrap();
        assert_eq!(response.events.len(), 1);
        assert_eq!(response.next_cursor.as_deref(), Some("42"));
    }
}
