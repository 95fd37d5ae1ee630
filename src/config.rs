use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const ENV_PREFIX: &str = "DISCOVERY_";
pub const DEFAULT_ENDPOINT: &str = "0.0.0.0:8005";
pub const DEFAULT_REGISTRY_ENDPOINT: &str = "http://127.0.0.1:8005";
pub const DEFAULT_SEGMENT: &str = "dev";

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub peer: PeerConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

// 注册中心节点
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址，未配置时从 peers 中按本机 IP 选取
    pub listen_addr: Option<String>,
    /// 集群内全部注册中心节点（可包含自身）
    pub peers: Vec<String>,
}

// 续约、淘汰与自我保护参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub renew_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub self_protect_ratio: f64,
    pub soft_expiry_secs: u64,
    pub hard_expiry_secs: u64,
    pub reseek_interval_secs: u64,
}

impl RegistryConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn soft_expiry(&self) -> Duration {
        Duration::from_secs(self.soft_expiry_secs)
    }

    pub fn hard_expiry(&self) -> Duration {
        Duration::from_secs(self.hard_expiry_secs)
    }

    pub fn reseek_interval(&self) -> Duration {
        Duration::from_secs(self.reseek_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            renew_interval_secs: 30,
            scan_interval_secs: 60,
            self_protect_ratio: 0.8,
            soft_expiry_secs: 90,
            hard_expiry_secs: 3600,
            reseek_interval_secs: 900,
        }
    }
}

// 节点间同步
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub queue_capacity: usize,
    pub call_timeout_ms: u64,
}

impl PeerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            call_timeout_ms: 500,
        }
    }
}

// 服务提供方/消费方客户端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub segment: String,
    pub registry_endpoints: Vec<String>,
    pub server_port: u16,
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            segment: DEFAULT_SEGMENT.to_string(),
            registry_endpoints: vec![DEFAULT_REGISTRY_ENDPOINT.to_string()],
            server_port: 8001,
            call_timeout_ms: 500,
            connect_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// 环境变量覆盖项，例如 DISCOVERY_LISTEN_ADDR、DISCOVERY_PEERS=a,b
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    listen_addr: Option<String>,
    peers: Option<Vec<String>>,
    segment: Option<String>,
    registry_endpoints: Option<Vec<String>>,
    log_level: Option<String>,
}

impl Config {
    /// 依次加载 .env、config.toml（可缺省）与 DISCOVERY_ 前缀的环境变量
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::from_file(DEFAULT_CONFIG_PATH)?;
        let overrides = envy::prefixed(ENV_PREFIX).from_env::<EnvOverrides>()?;
        config.apply(overrides);
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(listen_addr) = overrides.listen_addr {
            self.server.listen_addr = Some(listen_addr);
        }
        if let Some(peers) = overrides.peers {
            self.server.peers = peers;
        }
        if let Some(segment) = overrides.segment {
            self.client.segment = segment;
        }
        if let Some(endpoints) = overrides.registry_endpoints {
            self.client.registry_endpoints = endpoints;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.registry.renew_interval(), Duration::from_secs(30));
        assert_eq!(config.registry.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.registry.soft_expiry(), Duration::from_secs(90));
        assert_eq!(config.registry.hard_expiry(), Duration::from_secs(3600));
        assert_eq!(config.peer.queue_capacity, 128);
        assert_eq!(config.peer.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.client.segment, "dev");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            peers = ["10.0.0.1:8005", "10.0.0.2:8005"]

            [registry]
            reseek_interval_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.server.peers.len(), 2);
        assert_eq!(config.registry.reseek_interval_secs, 60);
        assert_eq!(config.registry.scan_interval_secs, 60);
        assert_eq!(config.registry.self_protect_ratio, 0.8);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = Config::default();
        config.apply(EnvOverrides {
            listen_addr: Some("127.0.0.1:9005".into()),
            segment: Some("prod".into()),
            ..Default::default()
        });

        assert_eq!(config.server.listen_addr.as_deref(), Some("127.0.0.1:9005"));
        assert_eq!(config.client.segment, "prod");
        assert_eq!(config.client.registry_endpoints, vec![DEFAULT_REGISTRY_ENDPOINT.to_string()]);
    }
}
