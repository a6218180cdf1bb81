use std::net::IpAddr;

use local_ip_address::list_afinet_netifas;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// Defaults to `info`, `RUST_LOG` overrides it.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces, skipping link-local and broadcast
/// addresses. Loopback is only considered when `include_loopback` is set,
/// which is useful when both peers run on the same host.
///
/// ## Returns
///
/// * `Some(IpAddr)`: The first usable interface address.
/// * `None`: The host exposes no usable IPv4 address.
pub fn select_host_address(include_loopback: bool) -> Option<IpAddr> {
    let interfaces = list_afinet_netifas().ok()?;

    let usable = |ip: &IpAddr| match ip {
        IpAddr::V4(v) => !v.is_link_local() && !v.is_broadcast() && !v.is_unspecified(),
        IpAddr::V6(_) => false,
    };

    let mut fallback = None;
    for (name, ip) in interfaces {
        debug!("iface: {} / {:?}", name, ip);
        if !usable(&ip) {
            continue;
        }
        if !ip.is_loopback() {
            return Some(ip);
        }
        if include_loopback && fallback.is_none() {
            fallback = Some(ip);
        }
    }

    fallback
}
