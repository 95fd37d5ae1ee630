use std::time::Duration;

use crate::config::{ClientConfig, DEFAULT_REGISTRY_ENDPOINT, DEFAULT_SEGMENT};

/// 注册中心客户端配置
#[derive(Debug, Clone)]
pub struct RegistryStubConfig {
    /// 所属环境分段
    pub segment: String,
    /// 注册中心地址列表
    pub endpoints: Vec<String>,
    /// 单次调用超时
    pub call_timeout: Duration,
    /// 连接超时时间
    pub connect_timeout: Duration,
}

impl Default for RegistryStubConfig {
    fn default() -> Self {
        Self {
            segment: DEFAULT_SEGMENT.to_string(),
            endpoints: vec![DEFAULT_REGISTRY_ENDPOINT.to_string()],
            call_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl From<&ClientConfig> for RegistryStubConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            segment: config.segment.clone(),
            endpoints: config.registry_endpoints.clone(),
            call_timeout: config.call_timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// 地址解析器配置
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// 定时刷新间隔
    pub refresh_interval: Duration,
    /// 刷新失败或结果为空时的重试延迟
    pub retry_delay: Duration,
    /// 两次主动解析之间的最小间隔
    pub min_resolve_interval: Duration,
    /// 单次拉取超时
    pub call_timeout: Duration,
    /// 负载均衡通道中后端的连接超时
    pub connect_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            retry_delay: Duration::from_secs(3),
            min_resolve_interval: Duration::from_secs(3),
            call_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// 心跳哨兵配置
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub renew_interval: Duration,
    pub retry_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            renew_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(3),
            call_timeout: Duration::from_millis(500),
        }
    }
}
