use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;

use super::config::{RegistryStubConfig, SentinelConfig};
use super::error::ClientError;
use super::sentinel::SentinelManager;
use super::stub::{RegistryApi, RegistryStub};
use crate::config::ClientConfig;
use crate::utils::local_ip;

/// 服务提供方
///
/// 托管用户的 tonic 路由，监听成功后为每个服务名启动哨兵，
/// 停止时先注销全部实例。
pub struct ProviderServer {
    registry: Arc<dyn RegistryApi>,
    ip: String,
    port: u16,
    metadata: HashMap<String, String>,
    config: SentinelConfig,
}

impl ProviderServer {
    pub fn new(registry: Arc<dyn RegistryApi>, port: u16) -> Self {
        Self {
            registry,
            ip: local_ip(),
            port,
            metadata: HashMap::new(),
            config: SentinelConfig::default(),
        }
    }

    /// 按客户端配置连接注册中心
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let stub = RegistryStub::new(RegistryStubConfig::from(config))?;
        let mut provider = Self::new(Arc::new(stub), config.server_port);
        provider.config.call_timeout = config.call_timeout();
        Ok(provider)
    }

    /// 覆盖注册使用的 IP
    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = ip.to_string();
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_sentinel_config(mut self, config: SentinelConfig) -> Self {
        self.config = config;
        self
    }

    /// 监听配置端口，收到 Ctrl-C 后退出
    pub async fn serve(&self, router: Router, service_names: &[&str]) -> Result<(), ClientError> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.port))).await?;
        self.serve_with_listener(listener, router, service_names, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// 在已绑定的监听器上提供服务，注册端口取自监听器
    pub async fn serve_with_listener<F>(
        &self,
        listener: TcpListener,
        router: Router,
        service_names: &[&str],
        signal: F,
    ) -> Result<(), ClientError>
    where
        F: Future<Output = ()> + Send,
    {
        let port = listener.local_addr()?.port();
        let sentinels = SentinelManager::with_address(
            self.registry.clone(),
            &self.ip,
            port,
            self.config.clone(),
        );

        for service_name in service_names {
            sentinels.add_service(service_name, self.metadata.clone());
        }
        tracing::info!(
            address = %sentinels.address(),
            services = ?service_names,
            "Provider server listening"
        );

        let sentinels_ref = &sentinels;
        let result = router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                signal.await;
                tracing::info!("Shutdown signal received, deregistering services");
                sentinels_ref.close().await;
            })
            .await;

        // 服务异常退出时同样注销
        sentinels.close().await;
        result.map_err(ClientError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::registry::registry_service_server::RegistryServiceServer;
    use crate::services::client::stub::tests::MockRegistry;
    use crate::services::peer::PeerPool;
    use crate::services::registry::{Registry, RegistryServer};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tonic::transport::Server;

    #[tokio::test]
    async fn test_serve_registers_and_deregisters() {
        let registry = Arc::new(MockRegistry::default());
        let provider = ProviderServer::new(registry.clone(), 0).with_ip("127.0.0.1");

        let router = Server::builder().add_service(RegistryServiceServer::new(RegistryServer::new(
            Arc::new(Registry::default()),
            Arc::new(PeerPool::new(Vec::new(), &PeerConfig::default())),
        )));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let serve = provider.serve_with_listener(listener, router, &["svc.A", "svc.B"], async {
            let _ = rx.await;
        });
        let check = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(registry.register_calls.load(Ordering::SeqCst), 2);
            assert_eq!(registry.cancel_calls.load(Ordering::SeqCst), 0);
            tx.send(()).unwrap();
        };

        let (result, ()) = tokio::join!(serve, check);
        assert!(result.is_ok());
        assert_eq!(registry.cancel_calls.load(Ordering::SeqCst), 2);
    }
}
