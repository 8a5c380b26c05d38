//! 网关层错误类型定义

use oht_protocol::ProtocolError;
use oht_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

use crate::retry::Retryable;

/// 网关层错误类型
///
/// 作为 [`GatewayResponse`](crate::GatewayResponse) 的一部分返回，
/// 从不以 panic 或 `Err` 形式穿越网关公共接口。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// 熔断器打开，请求未发出
    #[error("Circuit breaker is open for {op}, firmware unavailable")]
    CircuitOpen { op: String },

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 响应载荷校验失败
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 调用方输入非法（进入重试循环前拒绝）
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 单次调用超时
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// 固件明确拒绝了命令
    #[error("Firmware rejected request: {0}")]
    Rejected(String),

    /// 降级已禁用或降级窗口耗尽
    #[error("Fallback unavailable: {0}")]
    FallbackUnavailable(String),
}

impl GatewayError {
    /// 是否为熔断拒绝
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Protocol(e) => !e.is_caller_error(),
            Self::Timeout(_) => true,
            Self::CircuitOpen { .. }
            | Self::InvalidRequest(_)
            | Self::Rejected(_)
            | Self::FallbackUnavailable(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::CircuitOpen {
            op: "send_command".into(),
        };
        assert!(err.to_string().contains("send_command"));
        assert!(err.is_circuit_open());

        let err = GatewayError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Operation timeout after 10s");
    }

    #[test]
    fn test_from_transport_error() {
        let err: GatewayError = TransportError::Timeout.into();
        assert!(matches!(err, GatewayError::Transport(TransportError::Timeout)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_caller_errors_not_retryable() {
        assert!(!GatewayError::InvalidRequest("negative speed".into()).is_retryable());
        assert!(
            !GatewayError::Protocol(ProtocolError::InvalidCommand("dock".into())).is_retryable()
        );
        assert!(GatewayError::Protocol(ProtocolError::Malformed("eof".into())).is_retryable());
        assert!(
            !GatewayError::CircuitOpen {
                op: "get_robot_status".into()
            }
            .is_retryable()
        );
    }
}
