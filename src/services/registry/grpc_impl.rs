use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::error::{RegistryError, SUCCESS_CODE};
use super::service::Registry;
use super::types::Instance;
use crate::registry::{
    CancelRequest, CancelResponse, FetchRequest, FetchResponse, RegisterRequest,
    RegisterResponse, RenewRequest, RenewResponse, ServiceInstance, SyncType,
    registry_service_server::RegistryService,
};
use crate::services::peer::{PeerPool, SyncMsg};

/// 注册中心 gRPC 入口
///
/// 把请求翻译为 Registry 调用，业务错误编码为响应码而不是 gRPC Status。
/// 带有同步标记的成功变更会投递到 PeerPool。
#[derive(Debug, Clone)]
pub struct RegistryServer {
    registry: Arc<Registry>,
    peers: Arc<PeerPool>,
}

impl RegistryServer {
    pub fn new(registry: Arc<Registry>, peers: Arc<PeerPool>) -> Self {
        Self { registry, peers }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn replicate(&self, msg: SyncMsg) {
        if msg.propagates() {
            self.peers.push_msg(msg.without_propagation()).await;
        }
    }
}

// 成功时 (0, "", Some)，失败时 (code, message, None)
fn encode(result: Result<Instance, RegistryError>) -> (i32, String, Option<ServiceInstance>) {
    match result {
        Ok(instance) => (SUCCESS_CODE, String::new(), Some(instance.into())),
        Err(e) => (e.code(), e.to_string(), None),
    }
}

#[tonic::async_trait]
impl RegistryService for RegistryServer {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let sync_type = req.sync_type();

        let result = self.registry.register(Instance::from(req));
        if let Ok(instance) = &result
            && sync_type == SyncType::Yes
        {
            self.peers
                .push_msg(SyncMsg::Register(instance.to_register_request(SyncType::None)))
                .await;
        }

        let (code, message, instance) = encode(result);
        Ok(Response::new(RegisterResponse {
            code,
            message,
            instance,
        }))
    }

    async fn renew(
        &self,
        request: Request<RenewRequest>,
    ) -> Result<Response<RenewResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .registry
            .renew(&req.segment, &req.service_name, &req.ip, req.port);

        match &result {
            Ok(_) => self.replicate(SyncMsg::Renew(req)).await,
            Err(e) => {
                tracing::debug!(
                    segment = %req.segment,
                    service_name = %req.service_name,
                    ip = %req.ip,
                    port = req.port,
                    error = %e,
                    "Renew rejected"
                );
            }
        }

        let (code, message, instance) = encode(result);
        Ok(Response::new(RenewResponse {
            code,
            message,
            instance,
        }))
    }

    async fn cancel(
        &self,
        request: Request<CancelRequest>,
    ) -> Result<Response<CancelResponse>, Status> {
        let req = request.into_inner();
        let result = self
            .registry
            .cancel(&req.segment, &req.service_name, &req.ip, req.port);

        if result.is_ok() {
            self.replicate(SyncMsg::Cancel(req)).await;
        }

        let (code, message, instance) = encode(result);
        Ok(Response::new(CancelResponse {
            code,
            message,
            instance,
        }))
    }

    async fn fetch(
        &self,
        request: Request<FetchRequest>,
    ) -> Result<Response<FetchResponse>, Status> {
        let req = request.into_inner();
        let instances = self
            .registry
            .fetch(&req.segment, &req.service_name)
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(Response::new(FetchResponse {
            code: SUCCESS_CODE,
            message: String::new(),
            instances,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::services::peer::pool::tests::RecordingPeer;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    fn register_request(ip: &str, sync_type: SyncType) -> RegisterRequest {
        Instance::new("dev", "svc", ip, 9000).to_register_request(sync_type)
    }

    fn renew_request(ip: &str, sync_type: SyncType) -> RenewRequest {
        RenewRequest {
            segment: "dev".into(),
            service_name: "svc".into(),
            ip: ip.into(),
            port: 9000,
            sync_type: sync_type as i32,
        }
    }

    fn server_without_peers() -> RegistryServer {
        RegistryServer::new(
            Arc::new(Registry::default()),
            Arc::new(PeerPool::new(Vec::new(), &PeerConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_register_fetch_cancel_codes() {
        let server = server_without_peers();

        let resp = server
            .register(Request::new(register_request("10.0.0.1", SyncType::Yes)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.instance.unwrap().ip, "10.0.0.1");

        let fetched = server
            .fetch(Request::new(FetchRequest {
                segment: "dev".into(),
                service_name: "svc".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched.code, 0);
        assert_eq!(fetched.instances.len(), 1);

        let resp = server
            .cancel(Request::new(CancelRequest {
                segment: "dev".into(),
                service_name: "svc".into(),
                ip: "10.0.0.1".into(),
                port: 9000,
                sync_type: SyncType::Yes as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, 0);
        assert!(server.registry().fetch("dev", "svc").is_empty());
    }

    #[tokio::test]
    async fn test_not_found_codes_carry_no_instance() {
        let server = server_without_peers();

        let resp = server
            .renew(Request::new(renew_request("10.0.0.1", SyncType::Yes)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, -1);
        assert!(resp.instance.is_none());

        server
            .register(Request::new(register_request("10.0.0.1", SyncType::None)))
            .await
            .unwrap();
        let resp = server
            .renew(Request::new(renew_request("10.0.0.2", SyncType::Yes)))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.code, -2);
        assert!(resp.instance.is_none());
        assert!(!resp.message.is_empty());
    }

    #[tokio::test]
    async fn test_only_flagged_mutations_are_replicated() {
        let recording = Arc::new(RecordingPeer::default());
        let pool = Arc::new(PeerPool::new(vec![recording.clone()], &PeerConfig::default()));
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        pool.start(&tracker, shutdown.clone());

        let server = RegistryServer::new(Arc::new(Registry::default()), pool);

        // 来自其他节点的同步请求不再转发
        server
            .register(Request::new(register_request("10.0.0.1", SyncType::None)))
            .await
            .unwrap();
        server
            .renew(Request::new(renew_request("10.0.0.1", SyncType::None)))
            .await
            .unwrap();
        // 失败的变更不转发
        server
            .renew(Request::new(renew_request("10.0.0.9", SyncType::Yes)))
            .await
            .unwrap();
        server
            .renew(Request::new(renew_request("10.0.0.1", SyncType::Yes)))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), recording.notify.notified())
            .await
            .expect("renew was not replicated");

        let received = recording.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert!(matches!(&received[0], SyncMsg::Renew(r) if r.ip == "10.0.0.1"));
        assert!(!received[0].propagates());

        shutdown.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
