//! Client IP extraction from HTTP headers
//!
//! Prefers the RFC 7239 Forwarded header, falls back to X-Forwarded-For
//! (rightmost entry), then to the socket remote address when provided.
//! Also provides prefix-truncating anonymization for stored addresses.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// Extract the client IP address from HTTP headers
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: Option<IpAddr>) -> Option<IpAddr> {
    extract_from_forwarded(headers)
        .or_else(|| extract_from_x_forwarded_for(headers))
        .or(socket_addr)
}

/// Parse RFC 7239 Forwarded header: `Forwarded: for=192.0.2.60;proto=http;by=...`
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("for=") {
                // Remove quotes, brackets, and port if present
                let ip_str = value
                    .trim_matches('"')
                    .trim_start_matches('[')
                    .split(']')
                    .next()
                    .unwrap_or(value)
                    .split(':')
                    .next()
                    .unwrap_or(value);

                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    None
}

/// Parse X-Forwarded-For, taking the rightmost parseable address
fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    xff.split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .next_back()
}

/// Anonymize an IP address by truncating to network prefix
///
/// - IPv4: Truncate to /24 (zero last octet)
/// - IPv6: Truncate to /48 (zero last 80 bits)
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let octets = addr.octets();
            IpAddr::V4(std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], 0))
        }
        IpAddr::V6(addr) => {
            let segments = addr.segments();
            IpAddr::V6(std::net::Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                0,
                0,
                0,
                0,
                0,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn falls_back_to_socket_address() {
        let headers = HeaderMap::new();
        let socket: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, Some(socket)), Some(socket));
        assert_eq!(extract_client_ip(&headers, None), None);
    }

    #[test]
    fn forwarded_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", HeaderValue::from_static("for=203.0.113.9;proto=https"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));

        let result = extract_client_ip(&headers, None);
        assert_eq!(result, Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn x_forwarded_for_takes_rightmost() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );

        let result = extract_client_ip(&headers, None);
        assert_eq!(result, Some("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn anonymizes_ipv4_to_slash_24() {
        let ip: IpAddr = "192.168.1.100".parse().unwrap();
        assert_eq!(anonymize_ip(ip), "192.168.1.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn anonymizes_ipv6_to_slash_48() {
        let ip: IpAddr = "2001:db8:85a3::8a2e:370:7334".parse().unwrap();
        assert_eq!(anonymize_ip(ip), "2001:db8:85a3::".parse::<IpAddr>().unwrap());
    }
}
