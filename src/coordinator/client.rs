//! HTTP client for the coordinator's public and sync endpoints

use crate::common::protocol::{classify, SyncMessage, PATH_SYNC};
use crate::common::{Error, Result};
use crate::coordinator::http::{WriteRequest, WriteResponse};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone)]
pub struct CoordinatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a local log and receive the coordinator-biased merge together
    /// with the coordinator's deleted indices.
    pub async fn sync(&self, log: BTreeMap<u64, String>) -> Result<SyncMessage> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, PATH_SYNC))
            .json(&SyncMessage {
                log,
                ..Default::default()
            })
            .send()
            .await
            .map_err(classify)?;
        if !response.status().is_success() {
            return Err(Error::MalformedReply(format!(
                "sync returned HTTP {}",
                response.status()
            )));
        }
        response.json().await.map_err(classify)
    }

    /// Append a message. Rejections come back as a response, not an error.
    pub async fn append(&self, msg: &str, w: i64) -> Result<WriteResponse> {
        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .json(&WriteRequest {
                msg: msg.to_string(),
                w: Some(w),
            })
            .send()
            .await
            .map_err(classify)?;
        Self::write_response(response).await
    }

    pub async fn delete(&self, index: u64, w: i64) -> Result<WriteResponse> {
        let response = self
            .client
            .delete(format!("{}/{}", self.base_url, index))
            .query(&[("w", w)])
            .send()
            .await
            .map_err(classify)?;
        Self::write_response(response).await
    }

    async fn write_response(response: reqwest::Response) -> Result<WriteResponse> {
        let status = response.status();
        let body = response.text().await.map_err(classify)?;
        serde_json::from_str(&body).map_err(|_| {
            Error::MalformedReply(format!("HTTP {}: {}", status, body))
        })
    }

    /// Rendered messages, once the coordinator's log has no gaps
    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(classify)?;
        response.json().await.map_err(classify)
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(classify)?;
        response.json().await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client =
            CoordinatorClient::new("http://127.0.0.1:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
    }

    #[tokio::test]
    async fn test_sync_against_unreachable_coordinator() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = CoordinatorClient::new(
            format!("http://127.0.0.1:{port}"),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.sync(BTreeMap::new()).await.unwrap_err();
        assert!(err.is_connect(), "unexpected error: {err}");
    }
}
