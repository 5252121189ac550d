use std::net::IpAddr;

use tokio::net::lookup_host;

use crate::error::ResolveError;
use crate::types::ResolvedTarget;

/// Turn an IP literal or a hostname into one address.
///
/// IP literals never touch DNS. Hostnames get exactly one lookup attempt; the first
/// address returned wins. Empty targets and targets carrying control characters are
/// rejected locally.
pub async fn resolve(target: &str) -> Result<ResolvedTarget, ResolveError> {
    let hostname = target.trim();
    if hostname.is_empty() {
        return Err(ResolveError::new(target, "target is empty"));
    }
    if hostname.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ResolveError::new(target, "target contains invalid characters"));
    }

    if let Some(address) = parse_literal(hostname) {
        log::debug!("[resolver] literal: target={} address={}", hostname, address);
        return Ok(ResolvedTarget {
            hostname: hostname.to_string(),
            address,
        });
    }

    // Port is irrelevant, lookup_host just needs a socket address shape.
    let mut addrs = lookup_host((hostname, 0))
        .await
        .map_err(|e| ResolveError::new(target, e.to_string()))?;
    let address = addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ResolveError::new(target, "no addresses found"))?;

    log::debug!("[resolver] resolved: target={} address={}", hostname, address);
    Ok(ResolvedTarget {
        hostname: hostname.to_string(),
        address,
    })
}

/// Accepts plain literals and bracketed IPv6 (`[::1]`).
fn parse_literal(s: &str) -> Option<IpAddr> {
    let s = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    s.parse::<IpAddr>().ok()
}
