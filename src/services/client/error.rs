use tonic::Status;

use crate::services::registry::error::{APPLICATION_NOT_FOUND_CODE, INSTANCE_NOT_FOUND_CODE};

/// 注册中心客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),
    #[error("Timeout error")]
    Timeout,
    #[error("Registry rejected request with code {code}: {message}")]
    Rejected { code: i32, message: String },
    #[error("Registry response carried no instance")]
    EmptyPayload,
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    /// 注册中心明确返回了业务错误码（而非网络层失败）
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }

    /// 注册中心中已不存在该应用或实例，通常意味着被淘汰
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::Rejected { code, .. }
                if *code == APPLICATION_NOT_FOUND_CODE || *code == INSTANCE_NOT_FOUND_CODE
        )
    }
}
