//! # OHT Transport Layer
//!
//! 固件 RPC 传输抽象层，提供统一的请求接口。
//!
//! 固件进程独占 RS485/Modbus 物理链路，控制面只通过本层的
//! [`FirmwareTransport`] 与之通信。实现：
//!
//! - [`HttpTransport`]（feature `http`，默认）：HTTP + JSON
//! - [`MockTransport`]（feature `mock`）：内存实现，可编排故障，用于测试

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "http")]
pub use http::HttpTransport;
#[cfg(feature = "mock")]
pub use mock::MockTransport;

/// 传输层统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Firmware returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response body: {0}")]
    Decode(String),
    #[error("Transport not configured: {0}")]
    NotConfigured(String),
}

impl TransportError {
    /// 是否值得重试
    ///
    /// 超时、连接失败、5xx/429 与畸形响应可重试；其余 4xx 表示请求本身
    /// 被拒绝，重试没有意义。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) | Self::Decode(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::NotConfigured(_) => false,
        }
    }
}

/// 固件 RPC 端点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    RobotStatus,
    Telemetry,
    SafetyStatus,
    Modules,
    Module(u8),
    Config,
    Diagnostics,
    Command,
    EmergencyStop,
    Health,
}

impl Endpoint {
    /// 固件侧 URL 路径
    pub fn path(&self) -> String {
        match self {
            Self::RobotStatus => "/api/v1/robot/status".to_string(),
            Self::Telemetry => "/api/v1/telemetry/current".to_string(),
            Self::SafetyStatus => "/api/v1/safety/status".to_string(),
            Self::Modules => "/api/v1/modules/status".to_string(),
            Self::Module(id) => format!("/api/v1/modules/{id}"),
            Self::Config => "/api/v1/system/config".to_string(),
            Self::Diagnostics => "/api/v1/system/diagnostics".to_string(),
            Self::Command => "/api/v1/robot/command".to_string(),
            Self::EmergencyStop => "/api/v1/robot/emergency-stop".to_string(),
            Self::Health => "/health".to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// 存活探测结果（只关心状态码）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReply {
    pub status_code: u16,
}

impl HealthReply {
    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }
}

/// 固件传输接口
///
/// 实现必须是无状态重试安全的：重试、熔断与超时由上层负责，
/// 传输层只执行单次请求。
#[async_trait]
pub trait FirmwareTransport: Send + Sync + fmt::Debug {
    /// `GET` 读取端点，返回未经校验的 JSON
    async fn get(&self, endpoint: Endpoint) -> Result<Value, TransportError>;

    /// `POST` JSON 请求体
    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, TransportError>;

    /// 存活探测
    async fn health(&self) -> Result<HealthReply, TransportError>;
}
