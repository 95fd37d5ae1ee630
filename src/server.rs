use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;

use crate::config::{Config, DEFAULT_ENDPOINT, ServerConfig};
use crate::registry::registry_service_server::RegistryServiceServer;
use crate::services::peer::PeerPool;
use crate::services::registry::{Registry, RegistryServer};
use crate::utils::{local_ip, strip_scheme};

/// 确定本节点地址
///
/// 优先使用显式配置；否则在 peers 中查找与本机 IP 相同的地址；都没有时使用默认地址。
/// 监听在 0.0.0.0 时以本机 IP 作为对外地址。
pub fn resolve_local_endpoint(config: &ServerConfig, ip: &str) -> String {
    let endpoint = config
        .listen_addr
        .as_deref()
        .map(strip_scheme)
        .or_else(|| {
            config
                .peers
                .iter()
                .map(|peer| strip_scheme(peer))
                .find(|peer| peer.rsplit_once(':').map(|(host, _)| host) == Some(ip))
        })
        .unwrap_or(DEFAULT_ENDPOINT);

    match endpoint.rsplit_once(':') {
        Some(("0.0.0.0", port)) => format!("{ip}:{port}"),
        _ => endpoint.to_string(),
    }
}

/// 本节点地址对应的监听地址，绑定所有网卡
pub fn bind_address(endpoint: &str) -> Option<SocketAddr> {
    let (_, port) = strip_scheme(endpoint).rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some(SocketAddr::from(([0, 0, 0, 0], port)))
}

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = resolve_local_endpoint(&config.server, &local_ip());
    let addr = bind_address(&endpoint).ok_or_else(|| format!("invalid listen endpoint: {endpoint}"))?;
    let listener = TcpListener::bind(addr).await?;

    serve(&config, listener, &endpoint, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    })
    .await
}

/// 在给定监听器上运行注册中心，`signal` 完成后停止服务与后台任务
pub async fn serve<F>(
    config: &Config,
    listener: TcpListener,
    endpoint: &str,
    signal: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send,
{
    let registry = Arc::new(Registry::new(config.registry.clone()));
    let peers = Arc::new(PeerPool::with_endpoints(
        &config.server.peers,
        endpoint,
        &config.peer,
    )?);

    let tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    registry.start_schedulers(&tracker, shutdown.clone());
    peers.start(&tracker, shutdown.clone());
    tracker.close();

    tracing::info!(
        endpoint = %endpoint,
        listen_addr = %listener.local_addr()?,
        peers = ?peers.endpoints(),
        "Registry server listening"
    );

    let result = Server::builder()
        .add_service(RegistryServiceServer::new(RegistryServer::new(registry, peers)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
            signal.await;
            tracing::info!("Shutdown signal received");
        })
        .await;

    shutdown.cancel();
    tracker.wait().await;
    tracing::info!("Registry server stopped");

    result?;
    Ok(())
}
