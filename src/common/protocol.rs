//! Coordinator ↔ replica RPC protocol
//!
//! Every call is one HTTP request and one JSON reply over a connection the
//! caller opens per attempt. Write and probe replies carry a bare
//! acknowledgment token; the caller validates it.

use crate::common::{Error, LogEntry, ReplicaAddress, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub const ACK_APPENDED: &str = "appended";
pub const ACK_DELETED: &str = "deleted";
pub const ACK_IS_ALIVE: &str = "is_alive";
/// Sent by a replica whose log already binds the index to another payload
pub const ACK_CONFLICT: &str = "conflict";

pub const PATH_APPEND: &str = "/rpc/append";
pub const PATH_DELETE: &str = "/rpc/delete";
pub const PATH_IS_ALIVE: &str = "/rpc/is_alive";
pub const PATH_SYNC: &str = "/sync";

/// Reply body of write and probe calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReply {
    pub ack: String,
}

impl AckReply {
    pub fn new(ack: &str) -> Self {
        Self {
            ack: ack.to_string(),
        }
    }
}

/// Body of a sync call in both directions: live entries as index → payload,
/// plus the indices the sender has deleted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub log: BTreeMap<u64, String>,
    #[serde(default)]
    pub retired: BTreeSet<u64>,
}

/// The two write-type operations fanned out to replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Append,
    Delete,
}

impl WriteOp {
    pub fn expected_ack(&self) -> &'static str {
        match self {
            WriteOp::Append => ACK_APPENDED,
            WriteOp::Delete => ACK_DELETED,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            WriteOp::Append => PATH_APPEND,
            WriteOp::Delete => PATH_DELETE,
        }
    }
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOp::Append => write!(f, "append"),
            WriteOp::Delete => write!(f, "delete"),
        }
    }
}

/// Check a reply token against the one the call must produce.
pub fn validate_ack(expected: &str, actual: &str) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::BadAck {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Request/reply channel from the coordinator to its replicas.
///
/// Implementations return the raw acknowledgment token; classifying it is
/// left to the caller.
#[async_trait]
pub trait ReplicaChannel: Send + Sync + 'static {
    async fn write(&self, replica: &ReplicaAddress, op: WriteOp, entry: &LogEntry)
        -> Result<String>;

    async fn probe(&self, replica: &ReplicaAddress) -> Result<String>;
}

/// [`ReplicaChannel`] over HTTP/JSON
#[derive(Clone)]
pub struct HttpReplicaChannel {
    client: reqwest::Client,
    ack_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpReplicaChannel {
    pub fn new(ack_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(ack_timeout.max(probe_timeout))
            // one connection per attempt
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            ack_timeout,
            probe_timeout,
        })
    }

    async fn ack_from(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::MalformedReply(format!("HTTP status {}", status)));
        }
        let reply: AckReply = response.json().await.map_err(classify)?;
        Ok(reply.ack)
    }
}

/// Map a client error onto the transport error taxonomy.
pub fn classify(e: reqwest::Error) -> Error {
    if e.is_connect() {
        Error::ConnectionFailed(e.to_string())
    } else if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_decode() {
        Error::MalformedReply(e.to_string())
    } else {
        Error::Http(e)
    }
}

#[async_trait]
impl ReplicaChannel for HttpReplicaChannel {
    async fn write(
        &self,
        replica: &ReplicaAddress,
        op: WriteOp,
        entry: &LogEntry,
    ) -> Result<String> {
        let url = format!("{}{}", replica.base_url(), op.path());
        let response = self
            .client
            .post(url)
            .timeout(self.ack_timeout)
            .json(entry)
            .send()
            .await
            .map_err(classify)?;
        Self::ack_from(response).await
    }

    async fn probe(&self, replica: &ReplicaAddress) -> Result<String> {
        let url = format!("{}{}", replica.base_url(), PATH_IS_ALIVE);
        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(classify)?;
        Self::ack_from(response).await
    }
}
