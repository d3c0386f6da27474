use gridgate_common::{ListenerConfig, Result};
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::debug;

/// Sockets held by the HTTP owner
#[derive(Debug, Default)]
pub struct BoundListeners {
    pub http: Option<TcpListener>,
    pub https: Option<TcpListener>,
    pub admin: Option<TcpListener>,
}

impl BoundListeners {
    /// Local addresses of every bound listener, in http/https/admin order
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        [&self.http, &self.https, &self.admin]
            .into_iter()
            .flatten()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }
}

#[derive(Debug)]
pub enum BindOutcome {
    /// Every configured port is bound
    Bound(BoundListeners),
    /// Another process already holds this address
    InUse(SocketAddr),
}

/// Binds every configured listener, all or nothing.
///
/// An address that is already in use is an expected outcome for a standby
/// gateway and is reported as [`BindOutcome::InUse`]; sockets bound before the
/// conflict are released. Any other failure is an error.
pub async fn bind_listeners(config: &ListenerConfig) -> Result<BindOutcome> {
    let mut bound = BoundListeners::default();
    let targets = [
        (config.http, &mut bound.http),
        (config.https, &mut bound.https),
        (config.admin, &mut bound.admin),
    ];

    for (addr, slot) in targets {
        let Some(addr) = addr else { continue };
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                debug!("Bound {}", addr);
                *slot = Some(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => return Ok(BindOutcome::InUse(addr)),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(BindOutcome::Bound(bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_port() -> Option<SocketAddr> {
        Some("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_bind_nothing_configured() {
        let outcome = bind_listeners(&ListenerConfig::default()).await.unwrap();
        match outcome {
            BindOutcome::Bound(listeners) => assert!(listeners.local_addrs().is_empty()),
            BindOutcome::InUse(addr) => panic!("unexpected conflict on {}", addr),
        }
    }

    #[tokio::test]
    async fn test_bind_all_listeners() {
        let config = ListenerConfig {
            http: any_port(),
            https: any_port(),
            admin: any_port(),
        };
        match bind_listeners(&config).await.unwrap() {
            BindOutcome::Bound(listeners) => assert_eq!(listeners.local_addrs().len(), 3),
            BindOutcome::InUse(addr) => panic!("unexpected conflict on {}", addr),
        }
    }

    #[tokio::test]
    async fn test_bind_conflict_is_in_use() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = holder.local_addr().unwrap();

        let config = ListenerConfig {
            http: any_port(),
            https: Some(taken),
            admin: None,
        };
        match bind_listeners(&config).await.unwrap() {
            BindOutcome::InUse(addr) => assert_eq!(addr, taken),
            BindOutcome::Bound(_) => panic!("port {} should be in use", taken),
        }
    }
}
