use crate::domain::block::Block;
use crate::domain::ports::BlockFetcher;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.etherscan.io/api";

/// Raw Etherscan proxy response. Failures come back with `status`/`message`
/// or a JSON-RPC `error` object instead of a block in `result`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    result: Value,
}

impl Envelope {
    fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(match error.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => error.to_string(),
            });
        }
        if self.status.is_some() {
            let detail = match &self.result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let message = self.message.as_deref().unwrap_or("NOTOK");
            return Some(format!("{}: {}", message, detail));
        }
        None
    }
}

/// Fetches blocks through the Etherscan proxy API.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EtherscanClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn call(&self, tag: &str, params: &[(&str, &str)]) -> Result<Envelope> {
        let mut query: Vec<(&str, &str)> = vec![("module", "proxy")];
        query.extend_from_slice(params);
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| PipelineError::fetch(tag, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(tag, format!("HTTP status {}", status)));
        }

        response
            .json::<Envelope>()
            .await
            .map_err(|e| PipelineError::fetch(tag, format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl BlockFetcher for EtherscanClient {
    async fn fetch_block(&self, block_number_hex: &str) -> Result<Block> {
        debug!(block = block_number_hex, "fetching block");
        let envelope = self
            .call(
                block_number_hex,
                &[
                    ("action", "eth_getBlockByNumber"),
                    ("tag", block_number_hex),
                    ("boolean", "true"),
                ],
            )
            .await?;

        if let Some(failure) = envelope.failure() {
            return Ok(Block::failed(failure));
        }
        match envelope.result {
            Value::Object(_) => Ok(serde_json::from_value(envelope.result)?),
            Value::Null => Ok(Block::failed(format!("block {} not found", block_number_hex))),
            other => Ok(Block::failed(other.to_string())),
        }
    }

    async fn latest_block_number(&self) -> Result<String> {
        let envelope = self.call("latest", &[("action", "eth_blockNumber")]).await?;
        if let Some(failure) = envelope.failure() {
            return Err(PipelineError::fetch("latest", failure));
        }
        match envelope.result {
            Value::String(number) => Ok(number),
            other => Err(PipelineError::fetch(
                "latest",
                format!("unexpected block number {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_block_parses_transactions() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api")
                    .query_param("module", "proxy")
                    .query_param("action", "eth_getBlockByNumber")
                    .query_param("tag", "0xff")
                    .query_param("apikey", "secret");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "number": "0xff",
                        "transactions": [
                            {"hash": "0x01", "from": "0xa", "to": "0xb", "value": "0x10"}
                        ]
                    }
                }));
            })
            .await;

        let client = EtherscanClient::new(server.url("/api"), Some("secret".to_string())).unwrap();
        let block = client.fetch_block("0xff").await.unwrap();

        mock.assert_async().await;
        assert_eq!(block.number.as_deref(), Some("0xff"));
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].value, "0x10");
        assert!(block.failure().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_becomes_embedded_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "status": "0",
                    "message": "NOTOK",
                    "result": "Max rate limit reached"
                }));
            })
            .await;

        let client = EtherscanClient::new(server.url("/api"), None).unwrap();
        let block = client.fetch_block("0xff").await.unwrap();

        assert_eq!(block.failure(), Some("NOTOK: Max rate limit reached"));
    }

    #[tokio::test]
    async fn test_rpc_error_becomes_embedded_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": -32602, "message": "invalid argument"}
                }));
            })
            .await;

        let client = EtherscanClient::new(server.url("/api"), None).unwrap();
        let block = client.fetch_block("0xzz").await.unwrap();

        assert_eq!(block.failure(), Some("invalid argument"));
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(503);
            })
            .await;

        let client = EtherscanClient::new(server.url("/api"), None).unwrap();
        let err = client.fetch_block("0xff").await.unwrap_err();

        assert!(matches!(err, PipelineError::Fetch { ref block, .. } if block == "0xff"));
    }

    #[tokio::test]
    async fn test_latest_block_number() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api")
                    .query_param("action", "eth_blockNumber");
                then.status(200)
                    .json_body(json!({"jsonrpc": "2.0", "id": 83, "result": "0x10d4f"}));
            })
            .await;

        let client = EtherscanClient::new(server.url("/api"), None).unwrap();
        assert_eq!(client.latest_block_number().await.unwrap(), "0x10d4f");
    }
}
