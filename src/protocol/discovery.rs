//! Hub discovery over mDNS (§4.E), feature-gated behind `network` exactly as
//! the teacher crate gates its own mDNS/interface-enumeration stack (`mdns`,
//! `if-addrs`) behind the same feature name.
//!
//! Discovery failures are non-fatal by construction: every entry point here
//! returns an empty set rather than an error on a browse failure, per §4.E
//! ("discovery failures are non-fatal and must not crash the agent").

use std::net::IpAddr;

/// One discovered hub (§4.E: "a set of `{hostname, ip, port}`").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hub {
    pub hostname: String,
    pub ip: IpAddr,
    pub port: u16,
}

/// The fixed mDNS service type the agent browses for.
pub const SERVICE_TYPE: &str = "_cfengine-hub._tcp.local";

/// Sort discovered hubs into the stable order Open Question #2 settled on:
/// lexicographic by `(hostname, ip, port)`.
#[must_use]
pub fn stable_order(mut hubs: Vec<Hub>) -> Vec<Hub> {
    hubs.sort();
    hubs
}

#[cfg(feature = "network")]
mod live {
    use super::{Hub, SERVICE_TYPE};
    use futures_util::StreamExt;
    use std::time::Duration;

    /// Browse for hubs for `timeout`, returning whatever responded. A
    /// browse failure (no mDNS responder on the network, permission denied
    /// on the multicast socket, …) yields an empty set rather than an
    /// error. `mdns` is stream/async-native, so this spins up a throwaway
    /// current-thread runtime to drive one bounded browse rather than
    /// requiring the whole agent to run inside an async executor.
    #[must_use]
    pub fn discover(timeout: Duration) -> Vec<Hub> {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start mDNS discovery runtime");
                return Vec::new();
            }
        };
        runtime.block_on(browse(timeout))
    }

    /// The current host's own interface addresses, so a hub announcement
    /// that's actually this host (common when the agent and hub share a
    /// machine in test/dev setups) can be filtered out rather than reported
    /// as a discoverable peer.
    fn local_addresses() -> Vec<std::net::IpAddr> {
        match if_addrs::get_if_addrs() {
            Ok(ifaces) => ifaces.into_iter().map(|i| i.ip()).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "could not enumerate local interfaces");
                Vec::new()
            }
        }
    }

    async fn browse(timeout: Duration) -> Vec<Hub> {
        let mut hubs = Vec::new();
        let stream = match mdns::discover::all(SERVICE_TYPE, timeout) {
            Ok(discovery) => discovery.listen(),
            Err(e) => {
                tracing::warn!(error = %e, "mDNS discovery unavailable");
                return hubs;
            }
        };
        tokio::pin!(stream);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => break,
                next = stream.next() => match next {
                    Some(Ok(response)) => {
                        let hostname = response.hostname().unwrap_or_default().to_string();
                        let port = response.port().unwrap_or(5308);
                        for ip in response.ip_addr() {
                            hubs.push(Hub { hostname: hostname.clone(), ip, port });
                        }
                    }
                    Some(Err(e)) => tracing::debug!(error = %e, "discarding malformed mDNS response"),
                    None => break,
                },
            }
        }

        let local = local_addresses();
        hubs.retain(|hub| !local.contains(&hub.ip));
        super::stable_order(hubs)
    }
}

#[cfg(feature = "network")]
pub use live::discover;

#[cfg(not(feature = "network"))]
/// Without the `network` feature, discovery is compiled out entirely and
/// always reports no hubs found.
#[must_use]
pub fn discover(_timeout: std::time::Duration) -> Vec<Hub> {
    Vec::new()
}
