//! ICMP echo pre-check run before opening the SSH transport.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::session::ReachabilityProbe;

const ECHO_PAYLOAD: [u8; 56] = [0; 56];

/// Pings the device once; no answer within the timeout fails the connect.
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    host: String,
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

/// Resolve `host` to one address, accepting IP literals directly.
pub async fn resolve_host(host: &str) -> Result<IpAddr, SessionError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    });
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|e| SessionError::Connect(format!("Cannot resolve {host}: {e}")))?;
    lookup
        .iter()
        .next()
        .ok_or_else(|| SessionError::Connect(format!("No address for {host}")))
}

#[async_trait::async_trait]
impl ReachabilityProbe for IcmpProbe {
    async fn check(&self) -> Result<(), SessionError> {
        let ip = resolve_host(&self.host).await?;
        match tokio::time::timeout(self.timeout, surge_ping::ping(ip, &ECHO_PAYLOAD)).await {
            Ok(Ok((_, rtt))) => {
                debug!(host = %self.host, %ip, rtt_ms = rtt.as_secs_f64() * 1000.0, "ICMP echo ok");
                Ok(())
            }
            Ok(Err(surge_ping::SurgeError::IOError(e)))
                if e.kind() == io::ErrorKind::PermissionDenied =>
            {
                // No raw-socket privilege: skip the pre-check rather than
                // refusing to connect.
                warn!(host = %self.host, "ICMP not permitted, skipping reachability check");
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Connect(format!(
                "{} ({ip}) unreachable: {e}",
                self.host
            ))),
            Err(_) => Err(SessionError::Connect(format!(
                "{} ({ip}) did not answer ICMP echo within {:?}",
                self.host, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_skip_dns() {
        assert_eq!(
            resolve_host("192.0.2.7").await.unwrap(),
            "192.0.2.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_host("::1").await.unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn probe_is_object_safe() {
        fn _assert(_: &dyn ReachabilityProbe) {}
        let probe = IcmpProbe::new("192.0.2.7", Duration::from_secs(1));
        _assert(&probe);
    }
}
