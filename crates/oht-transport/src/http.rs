//! HTTP + JSON 传输实现
//!
//! 包装 `reqwest::Client`，连接池复用，单次请求超时由客户端强制执行。
//! 不做重试：重试策略属于上层 `RetryExecutor`。

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

use crate::{Endpoint, FirmwareTransport, HealthReply, TransportError};

/// HTTP 固件传输
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// 创建 HTTP 传输
    ///
    /// # 参数
    /// - `base_url`: 固件地址（如 `http://127.0.0.1:8081`）
    /// - `timeout`: 单次请求超时
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportError::NotConfigured(format!(
                "firmware url must start with http:// or https://, got {base_url:?}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| TransportError::NotConfigured(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: Endpoint,
    ) -> Result<Value, TransportError> {
        let resp = request.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        trace!(%endpoint, status = status.as_u16(), "firmware response");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl FirmwareTransport for HttpTransport {
    async fn get(&self, endpoint: Endpoint) -> Result<Value, TransportError> {
        self.send(self.client.get(self.url(endpoint)), endpoint).await
    }

    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, TransportError> {
        self.send(self.client.post(self.url(endpoint)).json(&body), endpoint)
            .await
    }

    async fn health(&self) -> Result<HealthReply, TransportError> {
        let resp = self
            .client
            .get(self.url(Endpoint::Health))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Ok(HealthReply {
            status_code: resp.status().as_u16(),
        })
    }
}
