use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::error::RegistryError;
use super::types::{AppKey, Instance, InstanceKey};

/// 一个 (segment, service_name) 下的全部实例
///
/// 实例表由一把读写锁保护，读取方拿到的都是副本。
#[derive(Debug)]
pub struct Application {
    key: AppKey,
    instances: RwLock<HashMap<InstanceKey, Instance>>,
}

impl Application {
    pub fn new(key: AppKey) -> Self {
        Self {
            key,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &AppKey {
        &self.key
    }

    // 锁中毒时继续使用内部数据，实例表本身不会处于半写状态
    fn read(&self) -> RwLockReadGuard<'_, HashMap<InstanceKey, Instance>> {
        self.instances.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<InstanceKey, Instance>> {
        self.instances.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 添加或更新实例，返回存储后的副本以及是否为新建
    ///
    /// 已存在时沿用传入的 up 时间戳；若已存储实例的 dirty 时间戳更新，
    /// 则保留已存储的其余字段，避免乱序到达的同步写覆盖较新的数据。
    pub fn add_instance(&self, mut instance: Instance) -> (Instance, bool) {
        let key = instance.key();
        let mut instances = self.write();

        let created = match instances.get(&key) {
            Some(existing) => {
                if existing.dirty_timestamp > instance.dirty_timestamp {
                    let up_timestamp = instance.up_timestamp;
                    instance = existing.clone();
                    instance.up_timestamp = up_timestamp;
                }
                false
            }
            None => true,
        };

        instances.insert(key, instance.clone());
        (instance, created)
    }

    pub fn cancel(&self, ip: &str, port: i32) -> Result<Instance, RegistryError> {
        self.write()
            .remove(&InstanceKey::new(ip, port))
            .ok_or_else(|| RegistryError::instance_not_found(ip, port))
    }

    pub fn renew(&self, ip: &str, port: i32) -> Result<Instance, RegistryError> {
        let mut instances = self.write();
        let instance = instances
            .get_mut(&InstanceKey::new(ip, port))
            .ok_or_else(|| RegistryError::instance_not_found(ip, port))?;
        instance.renew_timestamp = crate::utils::now_nanos();
        Ok(instance.clone())
    }

    pub fn instance_count(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn list_instances(&self) -> Vec<Instance> {
        self.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application::new(AppKey::new("dev", "svc"))
    }

    fn instance(ip: &str, port: i32, dirty: i64) -> Instance {
        let mut instance = Instance::new("dev", "svc", ip, port);
        instance.dirty_timestamp = dirty;
        instance
    }

    #[test]
    fn test_add_instance_reports_creation() {
        let app = app();

        let (_, created) = app.add_instance(instance("10.0.0.1", 9000, 1));
        assert!(created);
        let (_, created) = app.add_instance(instance("10.0.0.1", 9000, 2));
        assert!(!created);
        let (_, created) = app.add_instance(instance("10.0.0.2", 9000, 1));
        assert!(created);

        assert_eq!(app.instance_count(), 2);
    }

    #[test]
    fn test_older_dirty_write_does_not_overwrite() {
        let app = app();

        let mut newer = instance("10.0.0.1", 9000, 200);
        newer.metadata.insert("version".into(), "v2".into());
        app.add_instance(newer);

        let mut older = instance("10.0.0.1", 9000, 100);
        older.metadata.insert("version".into(), "v1".into());
        older.up_timestamp = 42;
        let (stored, created) = app.add_instance(older);

        assert!(!created);
        assert_eq!(stored.dirty_timestamp, 200);
        assert_eq!(stored.metadata.get("version").map(String::as_str), Some("v2"));
        // up 时间戳总是取传入值
        assert_eq!(stored.up_timestamp, 42);
    }

    #[test]
    fn test_newer_dirty_write_overwrites() {
        let app = app();
        app.add_instance(instance("10.0.0.1", 9000, 100));

        let mut newer = instance("10.0.0.1", 9000, 300);
        newer.metadata.insert("zone".into(), "b".into());
        let (stored, _) = app.add_instance(newer);

        assert_eq!(stored.dirty_timestamp, 300);
        assert_eq!(app.list_instances()[0].metadata.get("zone").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_cancel_and_renew_unknown_instance() {
        let app = app();
        assert_eq!(
            app.cancel("10.0.0.9", 1),
            Err(RegistryError::instance_not_found("10.0.0.9", 1))
        );
        assert!(app.renew("10.0.0.9", 1).is_err());
    }

    #[test]
    fn test_renew_updates_timestamp() {
        let app = app();
        let mut stale = instance("10.0.0.1", 9000, 1);
        stale.renew_timestamp = 0;
        app.add_instance(stale);

        let renewed = app.renew("10.0.0.1", 9000).unwrap();
        assert!(renewed.renew_timestamp > 0);

        let removed = app.cancel("10.0.0.1", 9000).unwrap();
        assert_eq!(removed.renew_timestamp, renewed.renew_timestamp);
        assert!(app.is_empty());
    }

    #[test]
    fn test_list_returns_copies() {
        let app = app();
        app.add_instance(instance("10.0.0.1", 9000, 1));

        let mut listed = app.list_instances();
        listed[0].ip = "mutated".into();

        assert_eq!(app.list_instances()[0].ip, "10.0.0.1");
    }
}
