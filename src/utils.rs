use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

pub const LOCAL_IP: &str = "127.0.0.1";

/// 当前 Unix 时间（纳秒）
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// 本机非回环 IPv4 地址，获取失败时返回 127.0.0.1
///
/// UDP connect 只选择路由出口，不会真正发包。
pub fn local_ip() -> String {
    let detect = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    match detect() {
        Ok(IpAddr::V4(ip)) if !ip.is_loopback() && !ip.is_unspecified() => ip.to_string(),
        _ => LOCAL_IP.to_string(),
    }
}

/// 补全 http:// 前缀，tonic Endpoint 需要完整 URI
pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// 去掉 scheme 前缀，得到 host:port
pub fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint)
        .trim_end_matches('/')
}

/// 构造解析目标 scheme:///service_name
pub fn build_target(scheme: &str, service_name: &str) -> String {
    format!("{scheme}:///{service_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("127.0.0.1:8005"), "http://127.0.0.1:8005");
        assert_eq!(normalize_endpoint("https://reg:8005"), "https://reg:8005");
        assert_eq!(strip_scheme("http://127.0.0.1:8005/"), "127.0.0.1:8005");
        assert_eq!(strip_scheme("127.0.0.1:8005"), "127.0.0.1:8005");
    }

    #[test]
    fn test_build_target() {
        let target = build_target("dev", "trade.TradeService");
        assert_eq!(target, "dev:///trade.TradeService");
    }

    #[test]
    fn test_local_ip_is_parseable() {
        assert!(local_ip().parse::<Ipv4Addr>().is_ok());
        assert!(now_nanos() > 0);
    }
}
