use std::fmt;

use thiserror::Error;
use tonic::Status;

use crate::registry::{CancelRequest, RegisterRequest, RenewRequest, SyncType};

/// 需要同步给其他注册中心节点的变更
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMsg {
    Register(RegisterRequest),
    Renew(RenewRequest),
    Cancel(CancelRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMsgKind {
    Register,
    Renew,
    Cancel,
}

impl fmt::Display for SyncMsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMsgKind::Register => write!(f, "register"),
            SyncMsgKind::Renew => write!(f, "renew"),
            SyncMsgKind::Cancel => write!(f, "cancel"),
        }
    }
}

impl SyncMsg {
    pub fn kind(&self) -> SyncMsgKind {
        match self {
            SyncMsg::Register(_) => SyncMsgKind::Register,
            SyncMsg::Renew(_) => SyncMsgKind::Renew,
            SyncMsg::Cancel(_) => SyncMsgKind::Cancel,
        }
    }

    /// 被同步的副本一律关闭再同步标记，避免在全连接拓扑中循环转发
    pub fn without_propagation(mut self) -> Self {
        match &mut self {
            SyncMsg::Register(req) => req.set_sync_type(SyncType::None),
            SyncMsg::Renew(req) => req.set_sync_type(SyncType::None),
            SyncMsg::Cancel(req) => req.set_sync_type(SyncType::None),
        }
        self
    }

    pub fn renew(segment: &str, service_name: &str, ip: &str, port: i32) -> Self {
        SyncMsg::Renew(RenewRequest {
            segment: segment.to_string(),
            service_name: service_name.to_string(),
            ip: ip.to_string(),
            port,
            sync_type: SyncType::None as i32,
        })
    }

    pub fn cancel(segment: &str, service_name: &str, ip: &str, port: i32) -> Self {
        SyncMsg::Cancel(CancelRequest {
            segment: segment.to_string(),
            service_name: service_name.to_string(),
            ip: ip.to_string(),
            port,
            sync_type: SyncType::None as i32,
        })
    }

    /// 目标实例的描述，用于日志
    pub fn target(&self) -> String {
        let (segment, service_name, ip, port) = match self {
            SyncMsg::Register(r) => (&r.segment, &r.service_name, &r.ip, r.port),
            SyncMsg::Renew(r) => (&r.segment, &r.service_name, &r.ip, r.port),
            SyncMsg::Cancel(r) => (&r.segment, &r.service_name, &r.ip, r.port),
        };
        format!("{segment}/{service_name}@{ip}:{port}")
    }

    pub fn propagates(&self) -> bool {
        let sync_type = match self {
            SyncMsg::Register(r) => r.sync_type(),
            SyncMsg::Renew(r) => r.sync_type(),
            SyncMsg::Cancel(r) => r.sync_type(),
        };
        sync_type == SyncType::Yes
    }
}

/// 节点同步错误
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Invalid peer endpoint: {0}")]
    InvalidEndpoint(#[from] tonic::transport::Error),
    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),
    #[error("Peer rejected sync with code {code}: {message}")]
    Rejected { code: i32, message: String },
    #[error("Peer call timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_propagation_clears_flag() {
        let msg = SyncMsg::Renew(RenewRequest {
            segment: "dev".into(),
            service_name: "svc".into(),
            ip: "10.0.0.1".into(),
            port: 9000,
            sync_type: SyncType::Yes as i32,
        });
        assert!(msg.propagates());

        let copy = msg.without_propagation();
        assert!(!copy.propagates());
        assert_eq!(copy.kind(), SyncMsgKind::Renew);
        assert_eq!(copy.target(), "dev/svc@10.0.0.1:9000");
    }
}
