use thiserror::Error;

pub const SUCCESS_CODE: i32 = 0;
pub const APPLICATION_NOT_FOUND_CODE: i32 = -1;
pub const INSTANCE_NOT_FOUND_CODE: i32 = -2;

/// 注册中心业务错误，每个变体对应一个稳定的响应码
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("application not found: segment={segment}, service_name={service_name}")]
    ApplicationNotFound {
        segment: String,
        service_name: String,
    },

    #[error("instance not found: {ip}:{port}")]
    InstanceNotFound { ip: String, port: i32 },
}

impl RegistryError {
    /// 对外暴露的响应码
    pub fn code(&self) -> i32 {
        match self {
            RegistryError::ApplicationNotFound { .. } => APPLICATION_NOT_FOUND_CODE,
            RegistryError::InstanceNotFound { .. } => INSTANCE_NOT_FOUND_CODE,
        }
    }

    pub(crate) fn application_not_found(segment: &str, service_name: &str) -> Self {
        RegistryError::ApplicationNotFound {
            segment: segment.to_string(),
            service_name: service_name.to_string(),
        }
    }

    pub(crate) fn instance_not_found(ip: &str, port: i32) -> Self {
        RegistryError::InstanceNotFound {
            ip: ip.to_string(),
            port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(RegistryError::application_not_found("dev", "svc").code(), -1);
        assert_eq!(RegistryError::instance_not_found("10.0.0.1", 9000).code(), -2);
    }
}
