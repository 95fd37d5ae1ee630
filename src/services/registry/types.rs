use std::collections::HashMap;
use std::fmt;

use crate::registry::{RegisterRequest, ServiceInstance, SyncType};

// 服务实例快照，所有时间戳均为纳秒
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub segment: String,
    pub service_name: String,
    pub ip: String,
    pub port: i32,
    pub metadata: HashMap<String, String>,
    pub reg_timestamp: i64,
    pub up_timestamp: i64,
    pub renew_timestamp: i64,
    pub dirty_timestamp: i64,
    pub latest_timestamp: i64,
}

impl Instance {
    /// 以当前时间初始化全部时间戳
    pub fn new(segment: &str, service_name: &str, ip: &str, port: i32) -> Self {
        let now = crate::utils::now_nanos();
        Self {
            segment: segment.to_string(),
            service_name: service_name.to_string(),
            ip: ip.to_string(),
            port,
            metadata: HashMap::new(),
            reg_timestamp: now,
            up_timestamp: now,
            renew_timestamp: now,
            dirty_timestamp: now,
            latest_timestamp: now,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.ip, self.port)
    }

    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.segment, &self.service_name)
    }

    /// 对外的地址形式 ip:port
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 转换为同步给其他节点的注册请求
    pub fn to_register_request(&self, sync_type: SyncType) -> RegisterRequest {
        RegisterRequest {
            segment: self.segment.clone(),
            service_name: self.service_name.clone(),
            ip: self.ip.clone(),
            port: self.port,
            metadata: self.metadata.clone(),
            reg_timestamp: self.reg_timestamp,
            up_timestamp: self.up_timestamp,
            renew_timestamp: self.renew_timestamp,
            dirty_timestamp: self.dirty_timestamp,
            latest_timestamp: self.latest_timestamp,
            sync_type: sync_type as i32,
        }
    }
}

impl From<RegisterRequest> for Instance {
    fn from(req: RegisterRequest) -> Self {
        Self {
            segment: req.segment,
            service_name: req.service_name,
            ip: req.ip,
            port: req.port,
            metadata: req.metadata,
            reg_timestamp: req.reg_timestamp,
            up_timestamp: req.up_timestamp,
            renew_timestamp: req.renew_timestamp,
            dirty_timestamp: req.dirty_timestamp,
            latest_timestamp: req.latest_timestamp,
        }
    }
}

impl From<Instance> for ServiceInstance {
    fn from(instance: Instance) -> Self {
        Self {
            segment: instance.segment,
            service_name: instance.service_name,
            ip: instance.ip,
            port: instance.port,
            metadata: instance.metadata,
            reg_timestamp: instance.reg_timestamp,
            up_timestamp: instance.up_timestamp,
            renew_timestamp: instance.renew_timestamp,
            dirty_timestamp: instance.dirty_timestamp,
            latest_timestamp: instance.latest_timestamp,
        }
    }
}

// 应用内实例唯一键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub ip: String,
    pub port: i32,
}

impl InstanceKey {
    pub fn new(ip: &str, port: i32) -> Self {
        Self {
            ip: ip.to_string(),
            port,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// 注册表中应用的唯一键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub segment: String,
    pub service_name: String,
}

impl AppKey {
    pub fn new(segment: &str, service_name: &str) -> Self {
        Self {
            segment: segment.to_string(),
            service_name: service_name.to_string(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment, self.service_name)
    }
}
