//! Client IP extraction and normalization.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;

/// IPv6 clients are grouped by their /64.
const IPV6_PREFIX_SEGMENTS: usize = 4;

/// Client IP from proxy headers (when trusted) or the socket.
///
/// Falls back to 127.0.0.1 when neither is available, e.g. in router tests.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        let real_ip = || {
            headers
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip;
        }
    }
    connect_info.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |c| c.0.ip())
}

pub fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let prefix: Vec<String> = v6.segments()[..IPV6_PREFIX_SEGMENTS]
                .iter()
                .map(|s| format!("{s:x}"))
                .collect();
            format!("{}::/64", prefix.join(":"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    fn socket() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9))), "192.168.1.9");
        let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0x85a3, 0x1234, 0, 0, 0, 1));
        assert_eq!(normalize_ip(v6), "2001:db8:85a3:1234::/64");
    }

    #[test]
    fn test_proxy_headers_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.50, 70.41.3.18".parse().unwrap());
        headers.insert("X-Real-IP", "198.51.100.25".parse().unwrap());

        assert_eq!(
            extract_client_ip(&headers, Some(&socket()), true),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))
        );
        assert_eq!(
            extract_client_ip(&headers, Some(&socket()), false),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn test_real_ip_and_fallbacks() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "not-an-ip".parse().unwrap());
        headers.insert("X-Real-IP", "198.51.100.25".parse().unwrap());
        assert_eq!(
            extract_client_ip(&headers, None, true),
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 25))
        );
        assert_eq!(
            extract_client_ip(&HeaderMap::new(), None, true),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
