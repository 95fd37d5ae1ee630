use std::sync::Arc;

use dashmap::DashMap;

use super::application::Application;
use super::census::Census;
use super::error::RegistryError;
use super::types::{AppKey, Instance};
use crate::config::RegistryConfig;

/// 服务注册表
///
/// 应用表由 DashMap 分片锁保护，只在创建/删除应用时持有写锁；
/// 实例级别的读写由各自 Application 的锁负责，互不阻塞。
#[derive(Debug)]
pub struct Registry {
    apps: DashMap<AppKey, Arc<Application>>,
    census: Census,
    pub(super) config: RegistryConfig,
    pub(super) span: tracing::Span,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            apps: DashMap::new(),
            census: Census::from_config(&config),
            config,
            span: tracing::info_span!("registry"),
        }
    }

    /// 注册实例，仅此操作可以创建应用
    pub fn register(&self, instance: Instance) -> Result<Instance, RegistryError> {
        let _enter = self.span.enter();
        let key = instance.app_key();

        // 添加期间一直持有分片锁，cancel 无法在此期间移除该应用。
        // 应用已存在时只取共享读锁，仅创建应用时才取写锁。
        let existing = self
            .apps
            .get(&key)
            .map(|app| app.add_instance(instance.clone()));
        let (stored, created) = match existing {
            Some(result) => result,
            None => {
                let app = self.apps.entry(key.clone()).or_insert_with(|| {
                    tracing::info!(application = %key, "Creating application");
                    Arc::new(Application::new(key.clone()))
                });
                app.add_instance(instance)
            }
        };

        if created {
            self.census.incr_need_count();
        }

        tracing::info!(
            application = %key,
            address = %stored.address(),
            created = created,
            "Registered instance"
        );
        Ok(stored)
    }

    /// 查询实例列表，未知应用返回空列表
    pub fn fetch(&self, segment: &str, service_name: &str) -> Vec<Instance> {
        match self.application(segment, service_name) {
            Some(app) => app.list_instances(),
            None => {
                tracing::debug!(
                    parent: &self.span,
                    segment = %segment,
                    service_name = %service_name,
                    "Fetch on unknown application"
                );
                Vec::new()
            }
        }
    }

    pub fn renew(
        &self,
        segment: &str,
        service_name: &str,
        ip: &str,
        port: i32,
    ) -> Result<Instance, RegistryError> {
        let app = self
            .application(segment, service_name)
            .ok_or_else(|| RegistryError::application_not_found(segment, service_name))?;

        let instance = app.renew(ip, port)?;
        self.census.incr_count();

        tracing::debug!(
            parent: &self.span,
            application = %app.key(),
            address = %instance.address(),
            "Renewed instance"
        );
        Ok(instance)
    }

    pub fn cancel(
        &self,
        segment: &str,
        service_name: &str,
        ip: &str,
        port: i32,
    ) -> Result<Instance, RegistryError> {
        let _enter = self.span.enter();
        let key = AppKey::new(segment, service_name);
        let app = self
            .application(segment, service_name)
            .ok_or_else(|| RegistryError::application_not_found(segment, service_name))?;

        let instance = app.cancel(ip, port)?;
        self.census.decr_need_count();

        // 实例数归零的应用必须立即移除
        if self.apps.remove_if(&key, |_, app| app.is_empty()).is_some() {
            tracing::info!(application = %key, "Removed empty application");
        }

        tracing::info!(
            application = %key,
            address = %instance.address(),
            "Cancelled instance"
        );
        Ok(instance)
    }

    pub fn application(&self, segment: &str, service_name: &str) -> Option<Arc<Application>> {
        self.apps
            .get(&AppKey::new(segment, service_name))
            .map(|entry| entry.value().clone())
    }

    /// 当前全部应用的快照
    pub fn applications(&self) -> Vec<Arc<Application>> {
        self.apps.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn application_count(&self) -> usize {
        self.apps.len()
    }

    pub fn total_instances(&self) -> usize {
        self.applications()
            .iter()
            .map(|app| app.instance_count())
            .sum()
    }

    pub fn census(&self) -> &Census {
        &self.census
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}
