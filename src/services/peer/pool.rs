use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::{Channel, Endpoint};
use tracing::Instrument;

use super::types::{PeerError, SyncMsg};
use crate::config::PeerConfig;
use crate::registry::registry_service_client::RegistryServiceClient;
use crate::utils::{normalize_endpoint, strip_scheme};

/// 同步目标节点
#[tonic::async_trait]
pub trait PeerClient: Send + Sync + 'static {
    fn endpoint(&self) -> &str;

    async fn sync(&self, msg: &SyncMsg) -> Result<(), PeerError>;
}

/// 基于 tonic 客户端的远端注册中心节点
#[derive(Debug, Clone)]
pub struct GrpcPeer {
    endpoint: String,
    client: RegistryServiceClient<Channel>,
}

impl GrpcPeer {
    /// 惰性建连，构造时不访问网络
    pub fn new(endpoint: &str) -> Result<Self, PeerError> {
        let channel = Endpoint::from_shared(normalize_endpoint(endpoint))?.connect_lazy();
        Ok(Self {
            endpoint: endpoint.to_string(),
            client: RegistryServiceClient::new(channel),
        })
    }
}

fn check_code(code: i32, message: String) -> Result<(), PeerError> {
    if code == 0 {
        Ok(())
    } else {
        Err(PeerError::Rejected { code, message })
    }
}

#[tonic::async_trait]
impl PeerClient for GrpcPeer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn sync(&self, msg: &SyncMsg) -> Result<(), PeerError> {
        let mut client = self.client.clone();
        match msg {
            SyncMsg::Register(req) => {
                let resp = client.register(req.clone()).await?.into_inner();
                check_code(resp.code, resp.message)
            }
            SyncMsg::Renew(req) => {
                let resp = client.renew(req.clone()).await?.into_inner();
                check_code(resp.code, resp.message)
            }
            SyncMsg::Cancel(req) => {
                let resp = client.cancel(req.clone()).await?.into_inner();
                check_code(resp.code, resp.message)
            }
        }
    }
}

/// 节点同步池
///
/// 变更消息进入有界队列，由单个后台任务逐条向所有节点并发重放。
/// 队列满时 `push_msg` 会等待，宁可放慢本节点的写入也不丢弃同步。
pub struct PeerPool {
    peers: Arc<Vec<Arc<dyn PeerClient>>>,
    sender: mpsc::Sender<SyncMsg>,
    receiver: Mutex<Option<mpsc::Receiver<SyncMsg>>>,
    call_timeout: Duration,
    span: tracing::Span,
}

impl std::fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPool")
            .field("peers", &self.endpoints())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl PeerPool {
    pub fn new(peers: Vec<Arc<dyn PeerClient>>, config: &PeerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            peers: Arc::new(peers),
            sender,
            receiver: Mutex::new(Some(receiver)),
            call_timeout: config.call_timeout(),
            span: tracing::info_span!("peer_pool"),
        }
    }

    /// 按地址列表创建，排除本节点地址和重复项
    pub fn with_endpoints(
        endpoints: &[String],
        local_endpoint: &str,
        config: &PeerConfig,
    ) -> Result<Self, PeerError> {
        let local = strip_scheme(local_endpoint);
        let mut seen = Vec::new();
        let mut peers: Vec<Arc<dyn PeerClient>> = Vec::new();

        for endpoint in endpoints {
            let address = strip_scheme(endpoint);
            if address == local || seen.contains(&address) {
                continue;
            }
            seen.push(address);
            peers.push(Arc::new(GrpcPeer::new(endpoint)?));
            tracing::debug!(peer = %endpoint, "Added peer to pool");
        }

        Ok(Self::new(peers, config))
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.endpoint().to_string()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// 投递一条同步消息；没有节点时直接忽略
    pub async fn push_msg(&self, msg: SyncMsg) {
        if self.peers.is_empty() {
            tracing::debug!(parent: &self.span, kind = %msg.kind(), "No peers configured, skipping sync");
            return;
        }

        let kind = msg.kind();
        if self.sender.send(msg).await.is_err() {
            tracing::warn!(parent: &self.span, kind = %kind, "Peer pool worker stopped, dropping sync message");
        }
    }

    /// 启动后台同步任务，重复调用无效
    pub fn start(&self, tracker: &TaskTracker, shutdown: CancellationToken) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut receiver) = receiver else {
            tracing::warn!(parent: &self.span, "Peer pool already started");
            return;
        };

        let peers = self.peers.clone();
        let call_timeout = self.call_timeout;
        tracing::info!(parent: &self.span, peers = ?self.endpoints(), "Starting peer pool");

        tracker.spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = receiver.recv() => match msg {
                            Some(msg) => Self::dispatch(&peers, msg, call_timeout).await,
                            None => break,
                        },
                    }
                }
                tracing::info!("Peer pool stopped");
            }
            .instrument(self.span.clone()),
        );
    }

    // 向所有节点并发重放，单个节点失败不影响其他节点
    async fn dispatch(peers: &[Arc<dyn PeerClient>], msg: SyncMsg, call_timeout: Duration) {
        let msg = msg.without_propagation();
        let kind = msg.kind();
        let target = msg.target();

        join_all(peers.iter().map(|peer| {
            let msg = &msg;
            let target = &target;
            async move {
                match tokio::time::timeout(call_timeout, peer.sync(msg)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(peer = %peer.endpoint(), kind = %kind, target = %target, "Synced to peer");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(peer = %peer.endpoint(), kind = %kind, target = %target, error = %e, "Failed to sync to peer");
                    }
                    Err(_) => {
                        tracing::warn!(
                            peer = %peer.endpoint(),
                            kind = %kind,
                            target = %target,
                            error = %PeerError::Timeout,
                            "Failed to sync to peer"
                        );
                    }
                }
            }
        }))
        .await;
    }
}
