//! Maps a batch worker name to its IPv4 address.
//!
//! HTCondor's `NO_DNS` mode names workers after their own address, dashes
//! instead of dots (`10-1-2-3.example.org`). We special-case that shape and
//! skip DNS entirely; everything else goes through a normal forward lookup.

use std::net::{Ipv4Addr, ToSocketAddrs};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve IPv4 address for host {0}")]
    NotFound(String),
}

/// Resolves a worker name to an IPv4 address.
pub fn resolve(name: &str) -> Result<Ipv4Addr, ResolveError> {
    if let Some(ip) = parse_no_dns_name(name) {
        return Ok(ip);
    }

    (name, 0_u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        }))
        .ok_or_else(|| ResolveError::NotFound(name.to_string()))
}

/// Recognizes the `D-D-D-D.<suffix>` NO_DNS shape, each `D` 1-3 decimal
/// digits, and reconstructs the dotted address without touching DNS.
fn parse_no_dns_name(name: &str) -> Option<Ipv4Addr> {
    let quad_part = name.split('.').next()?;
    let octets: Vec<&str> = quad_part.split('-').collect();
    if octets.len() != 4 {
        return None;
    }

    let mut parsed = [0_u8; 4];
    for (slot, octet) in parsed.iter_mut().zip(octets.iter()) {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = octet.parse().ok()?;
    }

    Some(Ipv4Addr::from(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dns_name_resolves_without_dns() {
        let ip = resolve("10-20-30-40.example.org").unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 20, 30, 40));
    }

    #[test]
    fn no_dns_name_rejects_out_of_range_segment_count() {
        assert!(parse_no_dns_name("10-20-30.example.org").is_none());
        assert!(parse_no_dns_name("10-20-30-40-50.example.org").is_none());
    }

    #[test]
    fn no_dns_name_rejects_non_numeric_segments() {
        assert!(parse_no_dns_name("a-20-30-40.example.org").is_none());
    }

    #[test]
    fn plain_hostname_without_dns_resolution_fails_cleanly() {
        let result = resolve("this.host.does.not.exist.invalid");
        assert!(result.is_err());
    }
}
