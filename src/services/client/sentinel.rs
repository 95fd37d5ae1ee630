use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::config::SentinelConfig;
use super::error::ClientError;
use super::retry::RetryTimer;
use super::stub::RegistryApi;
use crate::registry::ServiceInstance;
use crate::utils::local_ip;

/// 哨兵状态，Closed 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelState {
    Unregistered,
    Registered,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentinelAction {
    Register,
    Renew,
}

struct SentinelInner {
    registry: Arc<dyn RegistryApi>,
    service_name: String,
    ip: String,
    port: i32,
    metadata: HashMap<String, String>,
    config: SentinelConfig,
    state: Mutex<SentinelState>,
}

impl SentinelInner {
    fn state(&self) -> SentinelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SentinelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn call(
        &self,
        fut: impl Future<Output = Result<ServiceInstance, ClientError>>,
    ) -> Result<ServiceInstance, ClientError> {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .unwrap_or(Err(ClientError::Timeout))
    }

    async fn register(&self, retry: &mut RetryTimer<SentinelAction>) {
        let result = self
            .call(self.registry.register(
                &self.service_name,
                &self.ip,
                self.port,
                self.metadata.clone(),
            ))
            .await;

        match result {
            Ok(_) => {
                tracing::info!("Registered instance");
                self.set_state(SentinelState::Registered);
                retry.cancel();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register instance, retrying");
                self.set_state(SentinelState::Unregistered);
                retry.schedule(self.config.retry_delay, SentinelAction::Register);
            }
        }
    }

    async fn renew(&self, retry: &mut RetryTimer<SentinelAction>) {
        let result = self
            .call(self.registry.renew(&self.service_name, &self.ip, self.port))
            .await;

        match result {
            Ok(_) => {
                tracing::debug!("Renewed instance");
            }
            Err(e) if e.is_not_found() => {
                // 已被注册中心淘汰，立即重新注册
                tracing::warn!(error = %e, "Instance evicted by registry, registering again");
                self.set_state(SentinelState::Unregistered);
                self.register(retry).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to renew instance, retrying");
                retry.schedule(self.config.retry_delay, SentinelAction::Renew);
            }
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut retry = RetryTimer::new();
        self.register(&mut retry).await;

        let period = self.config.renew_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                action = retry.fired() => match action {
                    SentinelAction::Register => self.register(&mut retry).await,
                    SentinelAction::Renew => self.renew(&mut retry).await,
                },
                _ = ticker.tick() => {
                    if self.state() == SentinelState::Registered {
                        self.renew(&mut retry).await;
                    }
                }
            }
        }

        let result = self
            .call(self.registry.cancel(&self.service_name, &self.ip, self.port))
            .await;
        match result {
            Ok(_) => tracing::info!("Deregistered instance"),
            Err(e) => tracing::warn!(error = %e, "Failed to deregister instance"),
        }
        self.set_state(SentinelState::Closed);
    }
}

/// 心跳哨兵
///
/// 为一个本地服务保持注册：启动即注册，注册成功后每 30 秒续约。
/// 续约时发现实例已被淘汰会立即重新注册，`close` 时尽力注销。
pub struct Sentinel {
    inner: Arc<SentinelInner>,
    shutdown: CancellationToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentinel")
            .field("service_name", &self.inner.service_name)
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

impl Sentinel {
    /// 启动哨兵，需要在 tokio 运行时内调用
    pub fn spawn(
        registry: Arc<dyn RegistryApi>,
        service_name: &str,
        ip: &str,
        port: i32,
        metadata: HashMap<String, String>,
        config: SentinelConfig,
    ) -> Self {
        let span = tracing::info_span!(
            "sentinel",
            segment = %registry.segment(),
            service_name = %service_name,
            address = %format!("{ip}:{port}")
        );
        let inner = Arc::new(SentinelInner {
            registry,
            service_name: service_name.to_string(),
            ip: ip.to_string(),
            port,
            metadata,
            config,
            state: Mutex::new(SentinelState::Unregistered),
        });

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(inner.clone().run(shutdown.clone()).instrument(span));

        Self {
            inner,
            shutdown,
            handle: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.inner.ip, self.inner.port)
    }

    pub fn state(&self) -> SentinelState {
        self.inner.state()
    }

    /// 停止心跳并注销实例，重复调用无效
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(service_name = %self.inner.service_name, error = %e, "Sentinel task failed");
            self.inner.set_state(SentinelState::Closed);
        }
    }
}

/// 管理本进程内所有服务的哨兵
pub struct SentinelManager {
    registry: Arc<dyn RegistryApi>,
    ip: String,
    port: i32,
    config: SentinelConfig,
    sentinels: DashMap<String, Arc<Sentinel>>,
}

impl SentinelManager {
    /// 使用本机 IP 创建
    pub fn new(registry: Arc<dyn RegistryApi>, port: u16, config: SentinelConfig) -> Self {
        Self::with_address(registry, &local_ip(), port, config)
    }

    pub fn with_address(
        registry: Arc<dyn RegistryApi>,
        ip: &str,
        port: u16,
        config: SentinelConfig,
    ) -> Self {
        Self {
            registry,
            ip: ip.to_string(),
            port: i32::from(port),
            config,
            sentinels: DashMap::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 为服务启动哨兵，已存在时返回 false
    pub fn add_service(&self, service_name: &str, metadata: HashMap<String, String>) -> bool {
        match self.sentinels.entry(service_name.to_string()) {
            Entry::Occupied(_) => {
                tracing::debug!(service_name = %service_name, "Sentinel already running");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Sentinel::spawn(
                    self.registry.clone(),
                    service_name,
                    &self.ip,
                    self.port,
                    metadata,
                    self.config.clone(),
                )));
                true
            }
        }
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<Sentinel>> {
        self.sentinels.get(service_name).map(|s| s.clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.sentinels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 停止并注销单个服务
    pub async fn remove_service(&self, service_name: &str) -> bool {
        match self.sentinels.remove(service_name) {
            Some((_, sentinel)) => {
                sentinel.close().await;
                true
            }
            None => false,
        }
    }

    /// 并发关闭全部哨兵
    pub async fn close(&self) {
        let sentinels: Vec<Arc<Sentinel>> = self
            .service_names()
            .into_iter()
            .filter_map(|name| self.sentinels.remove(&name).map(|(_, s)| s))
            .collect();
        tracing::info!(count = sentinels.len(), "Closing sentinels");
        join_all(sentinels.iter().map(|s| s.close())).await;
    }
}
