//! Statbot Bridge Adapter
//!
//! HTTP client for the browser-automation bridge that watches the chat surface

use anyhow::anyhow;
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use statbot_config::BridgeConfig;
use statbot_ipc::{MessageSource, ObservedMessage, ReplyActuator};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge {endpoint} request failed: {source}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("bridge {endpoint} HTTP {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },

    #[error("bridge {endpoint} decode failed: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("bridge {endpoint} returned ok=false: {detail}")]
    Rejected {
        endpoint: &'static str,
        detail: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    conversation_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct BridgeAdapter {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl BridgeAdapter {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let mut raw = config.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| anyhow!("Invalid bridge.base_url '{}': {}", config.base_url, e))?;
        let timeout = config
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            client: Self::build_client(timeout)?,
            base_url,
            auth_token: config.auth_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn build_client(timeout_secs: u64) -> anyhow::Result<Client> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))
    }

    pub fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| anyhow!("bad bridge endpoint '{}': {}", path, e))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_checked(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, BridgeError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| BridgeError::Request { endpoint, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BridgeError::Status { endpoint, status });
        }
        Ok(resp)
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        let url = self.endpoint("health")?;
        self.send_checked("health", self.client.get(url)).await?;
        Ok(())
    }

    /// Latest message of every open conversation.
    pub async fn fetch_messages(&self) -> anyhow::Result<Vec<ObservedMessage>> {
        let url = self.endpoint("messages")?;
        let resp = self.send_checked("messages", self.client.get(url)).await?;
        let messages = resp
            .json::<Vec<ObservedMessage>>()
            .await
            .map_err(|source| BridgeError::Decode {
                endpoint: "messages",
                source,
            })?;
        Ok(messages)
    }

    pub async fn send_text(&self, conversation_id: &str, text: &str) -> anyhow::Result<()> {
        let url = self.endpoint("send")?;
        let body = SendRequest {
            conversation_id,
            text,
        };
        let resp = self
            .send_checked("send", self.client.post(url).json(&body))
            .await?;
        let parsed: SendResponse = resp.json().await.map_err(|source| BridgeError::Decode {
            endpoint: "send",
            source,
        })?;
        if !parsed.ok {
            return Err(BridgeError::Rejected {
                endpoint: "send",
                detail: parsed.error.unwrap_or_else(|| "no detail".to_string()),
            }
            .into());
        }
        Ok(())
    }

    pub async fn release_session(&self) -> anyhow::Result<()> {
        let url = self.endpoint("release")?;
        self.send_checked("release", self.client.post(url)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageSource for BridgeAdapter {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.health().await?;
        info!("Bridge reachable at {}", self.base_url);
        Ok(())
    }

    async fn poll(&self) -> anyhow::Result<Vec<ObservedMessage>> {
        self.fetch_messages().await
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.release_session().await
    }
}

#[async_trait::async_trait]
impl ReplyActuator for BridgeAdapter {
    async fn deliver(&self, conversation_id: &str, text: &str) -> bool {
        match self.send_text(conversation_id, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Sending to {} failed: {:#}", conversation_id, e);
                false
            }
        }
    }
}
