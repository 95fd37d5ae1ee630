use std::collections::HashMap;
use std::future::Future;

use tonic::transport::{Channel, Endpoint};
use tonic::{Response, Status};

use super::config::RegistryStubConfig;
use super::error::ClientError;
use crate::registry::{
    CancelRequest, FetchRequest, RegisterRequest, RenewRequest, ServiceInstance, SyncType,
    registry_service_client::RegistryServiceClient,
};
use crate::utils::{normalize_endpoint, now_nanos};

/// 注册中心访问接口
///
/// 哨兵与地址解析器只依赖这个接口，便于替换为测试桩。
#[tonic::async_trait]
pub trait RegistryApi: Send + Sync + 'static {
    /// 当前客户端所属的 segment
    fn segment(&self) -> &str;

    async fn register(
        &self,
        service_name: &str,
        ip: &str,
        port: i32,
        metadata: HashMap<String, String>,
    ) -> Result<ServiceInstance, ClientError>;

    async fn renew(&self, service_name: &str, ip: &str, port: i32)
    -> Result<ServiceInstance, ClientError>;

    async fn cancel(&self, service_name: &str, ip: &str, port: i32)
    -> Result<ServiceInstance, ClientError>;

    async fn fetch(&self, service_name: &str) -> Result<Vec<ServiceInstance>, ClientError>;
}

/// 基于 tonic 的注册中心客户端
///
/// 在所有注册中心地址之间负载均衡，客户端发起的变更都带 `SyncType::Yes`。
#[derive(Debug, Clone)]
pub struct RegistryStub {
    config: RegistryStubConfig,
    client: RegistryServiceClient<Channel>,
}

impl RegistryStub {
    /// 创建客户端，需要在 tokio 运行时内调用
    pub fn new(config: RegistryStubConfig) -> Result<Self, ClientError> {
        if config.endpoints.is_empty() {
            return Err(ClientError::Unavailable("no registry endpoints configured".into()));
        }

        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Endpoint::from_shared(normalize_endpoint(endpoint))
                    .map(|e| e.connect_timeout(config.connect_timeout))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let channel = Channel::balance_list(endpoints.into_iter());
        tracing::debug!(
            segment = %config.segment,
            endpoints = ?config.endpoints,
            "Created registry stub"
        );

        Ok(Self {
            config,
            client: RegistryServiceClient::new(channel),
        })
    }

    /// 便捷的创建方法，使用默认配置
    pub fn connect(segment: &str, endpoints: Vec<String>) -> Result<Self, ClientError> {
        Self::new(RegistryStubConfig {
            segment: segment.to_string(),
            endpoints,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RegistryStubConfig {
        &self.config
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<Response<T>, Status>>,
    ) -> Result<T, ClientError> {
        let response = tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(response.into_inner())
    }

    /// 在指定 segment 下查询实例
    pub async fn fetch_in(
        &self,
        segment: &str,
        service_name: &str,
    ) -> Result<Vec<ServiceInstance>, ClientError> {
        let mut client = self.client.clone();
        let response = self
            .call(client.fetch(FetchRequest {
                segment: segment.to_string(),
                service_name: service_name.to_string(),
            }))
            .await?;

        if response.code != 0 {
            return Err(ClientError::Rejected {
                code: response.code,
                message: response.message,
            });
        }
        Ok(response.instances)
    }
}

fn accept(
    code: i32,
    message: String,
    instance: Option<ServiceInstance>,
) -> Result<ServiceInstance, ClientError> {
    if code != 0 {
        return Err(ClientError::Rejected { code, message });
    }
    instance.ok_or(ClientError::EmptyPayload)
}

#[tonic::async_trait]
impl RegistryApi for RegistryStub {
    fn segment(&self) -> &str {
        &self.config.segment
    }

    async fn register(
        &self,
        service_name: &str,
        ip: &str,
        port: i32,
        metadata: HashMap<String, String>,
    ) -> Result<ServiceInstance, ClientError> {
        let now = now_nanos();
        let mut client = self.client.clone();
        let response = self
            .call(client.register(RegisterRequest {
                segment: self.config.segment.clone(),
                service_name: service_name.to_string(),
                ip: ip.to_string(),
                port,
                metadata,
                reg_timestamp: now,
                up_timestamp: now,
                renew_timestamp: now,
                dirty_timestamp: now,
                latest_timestamp: now,
                sync_type: SyncType::Yes as i32,
            }))
            .await?;
        accept(response.code, response.message, response.instance)
    }

    async fn renew(
        &self,
        service_name: &str,
        ip: &str,
        port: i32,
    ) -> Result<ServiceInstance, ClientError> {
        let mut client = self.client.clone();
        let response = self
            .call(client.renew(RenewRequest {
                segment: self.config.segment.clone(),
                service_name: service_name.to_string(),
                ip: ip.to_string(),
                port,
                sync_type: SyncType::Yes as i32,
            }))
            .await?;
        accept(response.code, response.message, response.instance)
    }

    async fn cancel(
        &self,
        service_name: &str,
        ip: &str,
        port: i32,
    ) -> Result<ServiceInstance, ClientError> {
        let mut client = self.client.clone();
        let response = self
            .call(client.cancel(CancelRequest {
                segment: self.config.segment.clone(),
                service_name: service_name.to_string(),
                ip: ip.to_string(),
                port,
                sync_type: SyncType::Yes as i32,
            }))
            .await?;
        accept(response.code, response.message, response.instance)
    }

    async fn fetch(&self, service_name: &str) -> Result<Vec<ServiceInstance>, ClientError> {
        self.fetch_in(&self.config.segment, service_name).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 可编排结果的注册中心测试桩
    #[derive(Default)]
    pub(crate) struct MockRegistry {
        pub(crate) register_calls: AtomicUsize,
        pub(crate) renew_calls: AtomicUsize,
        pub(crate) cancel_calls: AtomicUsize,
        pub(crate) fetch_calls: AtomicUsize,
        /// 前 N 次注册失败
        pub(crate) register_failures: AtomicUsize,
        /// 续约的预设结果，按顺序消费，耗尽后成功
        pub(crate) renew_script: Mutex<Vec<Result<(), i32>>>,
        /// 拉取的预设结果，耗尽后返回 instances
        pub(crate) fetch_script: Mutex<Vec<Result<Vec<ServiceInstance>, ()>>>,
        pub(crate) instances: Mutex<Vec<ServiceInstance>>,
    }

    pub(crate) fn service_instance(ip: &str, port: i32) -> ServiceInstance {
        ServiceInstance {
            segment: "dev".into(),
            service_name: "svc".into(),
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    #[tonic::async_trait]
    impl RegistryApi for MockRegistry {
        fn segment(&self) -> &str {
            "dev"
        }

        async fn register(
            &self,
            _service_name: &str,
            ip: &str,
            port: i32,
            _metadata: HashMap<String, String>,
        ) -> Result<ServiceInstance, ClientError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.register_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.register_failures.store(failures - 1, Ordering::SeqCst);
                return Err(ClientError::Timeout);
            }
            Ok(service_instance(ip, port))
        }

        async fn renew(
            &self,
            _service_name: &str,
            ip: &str,
            port: i32,
        ) -> Result<ServiceInstance, ClientError> {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.renew_script.lock().unwrap();
                if script.is_empty() { Ok(()) } else { script.remove(0) }
            };
            match next {
                Ok(()) => Ok(service_instance(ip, port)),
                Err(0) => Err(ClientError::Timeout),
                Err(code) => Err(ClientError::Rejected {
                    code,
                    message: "not found".into(),
                }),
            }
        }

        async fn cancel(
            &self,
            _service_name: &str,
            ip: &str,
            port: i32,
        ) -> Result<ServiceInstance, ClientError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(service_instance(ip, port))
        }

        async fn fetch(&self, _service_name: &str) -> Result<Vec<ServiceInstance>, ClientError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.fetch_script.lock().unwrap();
                if script.is_empty() { None } else { Some(script.remove(0)) }
            };
            match next {
                Some(Ok(instances)) => Ok(instances),
                Some(Err(())) => Err(ClientError::Timeout),
                None => Ok(self.instances.lock().unwrap().clone()),
            }
        }
    }

    #[test]
    fn test_accept_maps_codes() {
        assert!(accept(0, String::new(), Some(service_instance("10.0.0.1", 1))).is_ok());
        assert!(matches!(accept(0, String::new(), None), Err(ClientError::EmptyPayload)));

        let err = accept(-2, "instance not found".into(), None).unwrap_err();
        assert!(err.is_rejected());
        assert!(err.is_not_found());
        assert!(!ClientError::Timeout.is_not_found());
    }

    #[tokio::test]
    async fn test_stub_requires_endpoints() {
        let err = RegistryStub::connect("dev", Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(_)));

        let stub = RegistryStub::connect("dev", vec!["127.0.0.1:8005".into()]).unwrap();
        assert_eq!(stub.segment(), "dev");
    }
}
