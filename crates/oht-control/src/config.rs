//! 控制面 TOML 配置
//!
//! 每个段落都有默认值，配置文件只需写出要覆盖的字段。时间统一以毫秒
//! （或注明的秒）为单位，加载后转换为各 crate 的强类型配置。
//!
//! ```toml
//! [firmware]
//! base_url = "http://127.0.0.1:8081"
//!
//! [circuit_breaker]
//! failure_threshold = 5
//!
//! [[safety_zones]]
//! name = "critical"
//! max_distance = 1.0
//! speed_cap = 0.1
//! ```

use oht_driver::{CircuitBreakerConfig, FallbackConfig, GatewayConfig, HealthConfig, RetryConfig};
use oht_safety::GovernorConfig;
use oht_state::StateConfig;
use oht_tools::{ConfigError, SafetyZone, SafetyZoneTable, SpeedLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ControlError;

/// `[firmware]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareSection {
    pub base_url: String,
    pub robot_id: String,
    pub request_timeout_ms: u64,
    /// 0 关闭读缓存
    pub cache_ttl_ms: u64,
}

impl Default for FirmwareSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            robot_id: "OHT-50-001".to_string(),
            request_timeout_ms: 10_000,
            cache_ttl_ms: 1_000,
        }
    }
}

/// `[circuit_breaker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_enabled: bool,
    pub history_capacity: usize,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_enabled: true,
            history_capacity: 1000,
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSection {
    /// 监督器探测周期
    pub check_interval_ms: u64,
    pub timeout_ms: u64,
    pub max_response_time_ms: u64,
    pub max_consecutive_failures: u32,
    pub window: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            timeout_ms: 5_000,
            max_response_time_ms: 2_000,
            max_consecutive_failures: 3,
            window: 100,
        }
    }
}

/// `[fallback]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackSection {
    pub enabled: bool,
    pub max_fallback_duration_secs: u64,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fallback_duration_secs: 30 * 60,
        }
    }
}

/// `[speed]`：速度限制与控制器预算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedSection {
    #[serde(flatten)]
    pub limits: SpeedLimits,
    pub response_budget_ms: u64,
    pub performance_window: usize,
}

impl Default for SpeedSection {
    fn default() -> Self {
        Self {
            limits: SpeedLimits::default(),
            response_budget_ms: 5,
            performance_window: 1000,
        }
    }
}

/// `[state]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateSection {
    pub history_capacity: usize,
    pub event_capacity: usize,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            event_capacity: 50,
        }
    }
}

/// 控制面完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    pub firmware: FirmwareSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub retry: RetrySection,
    pub health: HealthSection,
    pub fallback: FallbackSection,
    pub speed: SpeedSection,
    pub state: StateSection,
    /// 最小的 `max_distance` 即临界阈值
    pub safety_zones: Vec<SafetyZone>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            firmware: FirmwareSection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            retry: RetrySection::default(),
            health: HealthSection::default(),
            fallback: FallbackSection::default(),
            speed: SpeedSection::default(),
            state: StateSection::default(),
            safety_zones: SafetyZoneTable::default().zones().to_vec(),
        }
    }
}

impl ControlConfig {
    /// 读取并校验配置文件
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ControlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ControlError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ControlError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 校验全部段落
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.firmware.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "firmware.base_url",
                format!("{url:?} is not an http(s) URL"),
            ));
        }
        if self.firmware.robot_id.trim().is_empty() {
            return Err(ConfigError::invalid("firmware.robot_id", "must not be empty"));
        }
        if self.circuit_breaker.recovery_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.recovery_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.health.check_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "health.check_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.health.window == 0 {
            return Err(ConfigError::invalid("health.window", "must be greater than 0"));
        }
        if self.retry.history_capacity == 0 {
            return Err(ConfigError::invalid(
                "retry.history_capacity",
                "must be greater than 0",
            ));
        }
        if self.fallback.max_fallback_duration_secs == 0 {
            return Err(ConfigError::invalid(
                "fallback.max_fallback_duration_secs",
                "must be greater than 0",
            ));
        }

        self.gateway_config().validate()?;
        self.governor_config().validate()?;
        self.state_config().validate()?;
        self.zone_table().map(|_| ())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            robot_id: self.firmware.robot_id.clone(),
            request_timeout: Duration::from_millis(self.firmware.request_timeout_ms),
            cache_ttl: Duration::from_millis(self.firmware.cache_ttl_ms),
            breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                recovery_timeout: Duration::from_millis(self.circuit_breaker.recovery_timeout_ms),
            },
            retry: RetryConfig {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                backoff_factor: self.retry.backoff_factor,
                jitter_enabled: self.retry.jitter_enabled,
                history_capacity: self.retry.history_capacity,
            },
            health: HealthConfig {
                timeout: Duration::from_millis(self.health.timeout_ms),
                max_response_time: Duration::from_millis(self.health.max_response_time_ms),
                max_consecutive_failures: self.health.max_consecutive_failures,
                window: self.health.window,
            },
            fallback: FallbackConfig {
                enabled: self.fallback.enabled,
                max_duration: Duration::from_secs(self.fallback.max_fallback_duration_secs),
            },
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            limits: self.speed.limits,
            response_budget: Duration::from_millis(self.speed.response_budget_ms),
            performance_window: self.speed.performance_window,
        }
    }

    pub fn state_config(&self) -> StateConfig {
        StateConfig {
            history_capacity: self.state.history_capacity,
            event_capacity: self.state.event_capacity,
        }
    }

    pub fn zone_table(&self) -> Result<SafetyZoneTable, ConfigError> {
        SafetyZoneTable::new(self.safety_zones.clone())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.health.check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_constants() {
        let config = ControlConfig::default();
        config.validate().unwrap();

        let gateway = config.gateway_config();
        assert_eq!(gateway, GatewayConfig::default());
        assert_eq!(config.governor_config(), GovernorConfig::default());
        assert_eq!(config.state_config(), StateConfig::default());
        assert_eq!(config.zone_table().unwrap(), SafetyZoneTable::default());
        assert_eq!(config.check_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ControlConfig::from_toml_str(
            r#"
            [firmware]
            base_url = "http://10.0.0.5:8081"

            [speed]
            max_speed = 1.5
            response_budget_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.firmware.base_url, "http://10.0.0.5:8081");
        assert_eq!(config.firmware.request_timeout_ms, 10_000);
        assert_eq!(config.speed.limits.max_speed, 1.5);
        assert_eq!(config.speed.limits.safety_speed, 0.5);
        assert_eq!(config.governor_config().response_budget, Duration::from_millis(10));
        assert_eq!(config.safety_zones.len(), 3);
    }

    #[test]
    fn test_safety_zones_replace_defaults() {
        let config = ControlConfig::from_toml_str(
            r#"
            [[safety_zones]]
            name = "near"
            max_distance = 0.5
            speed_cap = 0.0

            [[safety_zones]]
            name = "far"
            max_distance = 2.0
            speed_cap = 0.3
            "#,
        )
        .unwrap();
        let table = config.zone_table().unwrap();
        assert_eq!(table.zones().len(), 2);
        assert_eq!(table.critical_threshold(), 0.5);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            ("[circuit_breaker]\nfailure_threshold = 0", "circuit_breaker.failure_threshold"),
            ("[health]\ncheck_interval_ms = 0", "health.check_interval_ms"),
            ("[retry]\nbackoff_factor = 0.5", "retry.backoff_factor"),
            ("[speed]\nsafety_speed = 3.0", "speed.safety_speed"),
            ("[state]\nhistory_capacity = 0", "state.history_capacity"),
            ("[firmware]\nbase_url = \"ftp://fw\"", "firmware.base_url"),
        ];
        for (content, field) in cases {
            let err = ControlConfig::from_toml_str(content).unwrap_err();
            assert!(
                matches!(&err, ControlError::Config(ConfigError::InvalidValue { field: f, .. }) if f == field),
                "{content}: {err}"
            );
        }
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = ControlConfig::from_toml_str("[firmware]\nbase_ulr = \"http://fw\"").unwrap_err();
        assert!(matches!(err, ControlError::Parse(_)));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let config = ControlConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[[safety_zones]]"));
        assert_eq!(ControlConfig::from_toml_str(&text).unwrap(), config);
    }
}
