//! On-demand service probe.
//!
//! Protocol modules need the `(target, port)` service row before they run.
//! When the row is already persisted this is a pure store lookup; otherwise
//! a single-port version scan fills it in, along with any virtual-host hint
//! the scan surfaces.

use nethawk_core::endpoint::Endpoint;
use nethawk_core::hosts::HostsWriter;
use nethawk_core::model::{Service, Target, VirtualHost};
use nethawk_core::store::Store;

use crate::{NmapConfig, PortScanner, ScanError};

/// Returns the persisted `(target, service)` pair for `(endpoint, port)`,
/// scanning the port first if the store has no row for it yet.
pub async fn ensure_service(
    store: &dyn Store,
    hosts: &dyn HostsWriter,
    nmap: NmapConfig,
    endpoint: &Endpoint,
    port: u16,
) -> Result<Option<(Target, Service)>, ScanError> {
    let Some(ip) = endpoint.ip else {
        return Ok(None);
    };
    let ip = ip.to_string();

    let mut target = store
        .get_or_create_target(
            Target::new(&ip)
                .with_hostname(endpoint.hostname.clone())
                .with_os_guess(Some(endpoint.os_guess.clone())),
        )
        .await?;

    if let Some(service) = find_service(store, &ip, port).await? {
        return Ok(Some((target, service)));
    }

    tracing::debug!(%ip, port, "No persisted service row, scanning");

    let mut scanner = PortScanner::new(&ip, nmap, Some("initial"), true)?;
    scanner.scan(Some(&port.to_string()), false).await?;
    let report = scanner.report()?;

    if let Some(vhost) = report.vhost_hint() {
        tracing::info!("Possible Virtual Host: '{vhost}'");
        target.hostname = Some(vhost.clone());
        store.save_target(&target).await?;
        hosts.add_host(&ip, &vhost, false).await?;
    }

    for service in report.services(&ip) {
        tracing::info!(
            "Discovered new service '{}' on port {}",
            service.name.as_deref().unwrap_or("Unknown"),
            service.port
        );
        store.get_or_create_service(service).await?;
    }

    if let Some(hostname) = target.hostname.clone() {
        store
            .get_or_create_vhost(VirtualHost {
                target_ip: ip.clone(),
                domain: hostname,
                port,
            })
            .await?;
    }

    Ok(find_service(store, &ip, port)
        .await?
        .map(|service| (target, service)))
}

async fn find_service(
    store: &dyn Store,
    ip: &str,
    port: u16,
) -> Result<Option<Service>, ScanError> {
    Ok(store
        .services(ip)
        .await?
        .into_iter()
        .find(|s| s.port == port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nethawk_core::endpoint::resolve_with_tries;
    use nethawk_core::hosts::MemoryHosts;
    use nethawk_core::model::Protocol;
    use nethawk_core::store::MemoryStore;

    #[tokio::test]
    async fn returns_persisted_service_without_scanning() {
        let store = MemoryStore::new();
        let hosts = MemoryHosts::new();
        store
            .get_or_create_service(Service {
                target_ip: "127.0.0.1".to_owned(),
                protocol: Protocol::Tcp,
                port: 8080,
                state: "open".to_owned(),
                reason: None,
                name: Some("http".to_owned()),
                product: None,
                version: None,
                extrainfo: None,
                cpe: Vec::new(),
            })
            .await
            .unwrap();

        // Loopback resolution needs no DNS and no open port for this path.
        let endpoint = resolve_with_tries("127.0.0.1", Some(1), 1).await.unwrap();

        let result = ensure_service(&store, &hosts, NmapConfig::default(), &endpoint, 8080)
            .await
            .unwrap();

        let (target, service) = result.unwrap();
        assert_eq!(target.ip, "127.0.0.1");
        assert_eq!(service.port, 8080);
        assert_eq!(service.name.as_deref(), Some("http"));
    }
}
