use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Channel;
use tracing::Instrument;

use super::balance::BalanceUpdater;
use super::config::ResolverConfig;
use super::error::ClientError;
use super::retry::RetryTimer;
use super::stub::RegistryApi;
use crate::utils::build_target;

/// 负载均衡通道的缓冲容量
const BALANCE_CHANNEL_CAPACITY: usize = 64;

/// 地址列表的消费方，通常是 RPC 层的负载均衡器
#[tonic::async_trait]
pub trait AddressUpdater: Send + Sync + 'static {
    /// 每次刷新都会收到一份完整的新列表
    async fn update(&self, addresses: Arc<Vec<String>>);

    /// 消费方已不再接收更新，解析器会将其移除
    fn is_closed(&self) -> bool {
        false
    }
}

/// 单次刷新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(usize),
    Empty,
    Failed,
}

impl RefreshOutcome {
    fn needs_retry(self) -> bool {
        !matches!(self, RefreshOutcome::Updated(_))
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    addresses: Arc<Vec<String>>,
    last_refresh: Option<Instant>,
}

/// 单个服务名的地址解析器
///
/// 创建时同步刷新一次，之后由后台任务定时刷新；刷新失败或结果为空时
/// 3 秒后重试。每次刷新整体替换地址列表并推送给全部消费方，
/// 消费方全部关闭后解析器随之停止。
pub struct Resolver {
    service_name: String,
    target: String,
    registry: Arc<dyn RegistryApi>,
    updaters: std::sync::Mutex<Vec<Arc<dyn AddressUpdater>>>,
    config: ResolverConfig,
    state: RwLock<ResolverState>,
    refresh_lock: Mutex<()>,
    resolve_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    span: tracing::Span,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.target)
            .field("addresses", &self.addresses())
            .finish()
    }
}

impl Resolver {
    /// 创建解析器，完成首次刷新后启动后台任务
    pub async fn start(
        service_name: &str,
        registry: Arc<dyn RegistryApi>,
        updater: Arc<dyn AddressUpdater>,
        config: ResolverConfig,
    ) -> Arc<Self> {
        let target = build_target(registry.segment(), service_name);
        let (resolve_tx, resolve_rx) = mpsc::channel(1);
        let resolver = Arc::new(Self {
            service_name: service_name.to_string(),
            span: tracing::info_span!("resolver", service = %target),
            target,
            registry,
            updaters: std::sync::Mutex::new(vec![updater]),
            config,
            state: RwLock::new(ResolverState::default()),
            refresh_lock: Mutex::new(()),
            resolve_tx,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        let outcome = resolver.refresh().await;
        let mut retry = RetryTimer::new();
        if outcome.needs_retry() {
            retry.schedule(resolver.config.retry_delay, ());
        }

        resolver.tracker.spawn(
            resolver
                .clone()
                .run(resolve_rx, retry)
                .instrument(resolver.span.clone()),
        );
        resolver.tracker.close();
        resolver
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ResolverState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ResolverState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 最近一次成功刷新得到的地址列表
    pub fn addresses(&self) -> Arc<Vec<String>> {
        self.read_state().addresses.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn updater_count(&self) -> usize {
        self.updaters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 增加一个消费方，并立即推送当前地址列表
    pub async fn add_updater(&self, updater: Arc<dyn AddressUpdater>) {
        // 与刷新互斥，避免新消费方先收到新列表再收到旧列表
        let _guard = self.refresh_lock.lock().await;
        self.updaters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(updater.clone());
        updater.update(self.addresses()).await;
    }

    // 移除已关闭的消费方，全部关闭时停止后台刷新
    fn live_updaters(&self) -> Vec<Arc<dyn AddressUpdater>> {
        let mut updaters = self.updaters.lock().unwrap_or_else(|e| e.into_inner());
        let before = updaters.len();
        updaters.retain(|updater| !updater.is_closed());

        if updaters.len() < before {
            tracing::debug!(
                parent: &self.span,
                removed = before - updaters.len(),
                "Dropped closed address consumers"
            );
        }
        if updaters.is_empty() && !self.shutdown.is_cancelled() {
            tracing::info!(parent: &self.span, "No address consumers left, stopping resolver");
            self.shutdown.cancel();
        }
        updaters.clone()
    }

    /// 请求立即刷新
    ///
    /// 距上次刷新不足最小间隔时忽略，返回请求是否被接受。
    pub fn resolve_now(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        {
            let mut state = self.write_state();
            if let Some(last) = state.last_refresh
                && last.elapsed() < self.config.min_resolve_interval
            {
                tracing::trace!(parent: &self.span, "Resolve request throttled");
                return false;
            }
            state.last_refresh = Some(Instant::now());
        }

        self.resolve_tx.try_send(()).is_ok()
    }

    /// 拉取一次地址列表并发布
    ///
    /// 拉取失败时保留旧列表；注册中心确认没有实例时发布空列表。
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;
        self.write_state().last_refresh = Some(Instant::now());

        let result =
            tokio::time::timeout(self.config.call_timeout, self.registry.fetch(&self.service_name))
                .await
                .unwrap_or(Err(ClientError::Timeout));

        let instances = match result {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "Failed to fetch instances, keeping last addresses");
                return RefreshOutcome::Failed;
            }
        };

        let addresses: Arc<Vec<String>> = Arc::new(
            instances
                .iter()
                .map(|instance| format!("{}:{}", instance.ip, instance.port))
                .collect(),
        );
        self.write_state().addresses = addresses.clone();
        for updater in self.live_updaters() {
            updater.update(addresses.clone()).await;
        }

        if addresses.is_empty() {
            tracing::warn!(parent: &self.span, "Registry returned no instances");
            RefreshOutcome::Empty
        } else {
            tracing::debug!(parent: &self.span, count = addresses.len(), "Refreshed addresses");
            RefreshOutcome::Updated(addresses.len())
        }
    }

    async fn run(self: Arc<Self>, mut resolve_rx: mpsc::Receiver<()>, mut retry: RetryTimer<()>) {
        let period = self.config.refresh_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
                Some(()) = resolve_rx.recv() => self.refresh().await,
                () = retry.fired() => self.refresh().await,
            };

            if outcome.needs_retry() {
                retry.schedule(self.config.retry_delay, ());
            } else {
                retry.cancel();
            }
        }

        tracing::debug!("Resolver stopped");
    }

    /// 停止后台刷新，可重复调用
    pub async fn close(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(parent: &self.span, "Closing resolver");
            self.shutdown.cancel();
        }
        self.tracker.wait().await;
    }
}

/// 按目标复用解析器，并为服务名构造负载均衡通道
pub struct ResolverBuilder {
    registry: Arc<dyn RegistryApi>,
    config: ResolverConfig,
    resolvers: DashMap<String, Arc<Resolver>>,
}

impl ResolverBuilder {
    pub fn new(registry: Arc<dyn RegistryApi>, config: ResolverConfig) -> Self {
        Self {
            registry,
            config,
            resolvers: DashMap::new(),
        }
    }

    /// 获取或创建服务名对应的解析器，同一目标只会有一个运行中的解析器
    ///
    /// 已存在时把 `updater` 加入其消费方并立即推送当前列表；已停止的解析器会被替换。
    pub async fn build(
        &self,
        service_name: &str,
        updater: Arc<dyn AddressUpdater>,
    ) -> Arc<Resolver> {
        let target = build_target(self.registry.segment(), service_name);
        let existing = self.resolvers.get(&target).map(|r| r.clone());
        if let Some(existing) = existing {
            if !existing.is_closed() {
                existing.add_updater(updater).await;
                return existing;
            }
            self.resolvers
                .remove_if(&target, |_, current| Arc::ptr_eq(current, &existing));
        }

        let resolver = Resolver::start(
            service_name,
            self.registry.clone(),
            updater.clone(),
            self.config.clone(),
        )
        .await;

        let winner = self
            .resolvers
            .entry(target)
            .or_insert_with(|| resolver.clone())
            .clone();
        if !Arc::ptr_eq(&winner, &resolver) {
            resolver.close().await;
            winner.add_updater(updater).await;
        }
        winner
    }

    /// 返回一个随注册中心地址列表自动增删后端的通道
    pub async fn connect(&self, service_name: &str) -> Result<Channel, ClientError> {
        let (channel, sender) = Channel::balance_channel::<String>(BALANCE_CHANNEL_CAPACITY);
        let updater = Arc::new(BalanceUpdater::new(sender, self.config.connect_timeout));
        let resolver = self.build(service_name, updater).await;

        if resolver.addresses().is_empty() {
            tracing::warn!(target_name = %resolver.target(), "No instances available yet");
        }
        Ok(channel)
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<Resolver>> {
        let target = build_target(self.registry.segment(), service_name);
        self.resolvers.get(&target).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// 关闭全部解析器
    pub async fn close(&self) {
        let resolvers: Vec<Arc<Resolver>> =
            self.resolvers.iter().map(|entry| entry.value().clone()).collect();
        self.resolvers.clear();
        for resolver in resolvers {
            resolver.close().await;
        }
    }
}
