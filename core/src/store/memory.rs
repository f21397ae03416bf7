//! In-memory store, used by tests and as fallback when MongoDB is down.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Store, StoreError};
use crate::model::{
    PathEntry, RobotsEntry, Service, ServiceLinks, Target, Technology, VirtualHost,
};

#[derive(Default)]
struct Inner {
    targets: BTreeMap<String, Target>,
    services: BTreeMap<(String, u16), Service>,
    vhosts: BTreeMap<(String, String), VirtualHost>,
    technologies: BTreeMap<(String, String, String, String), Technology>,
    links: BTreeMap<(String, String), ServiceLinks>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_target(&self, ip: &str) -> Result<Option<Target>, StoreError> {
        Ok(self.lock().targets.get(ip).cloned())
    }

    async fn get_or_create_target(&self, target: Target) -> Result<Target, StoreError> {
        let mut inner = self.lock();
        Ok(inner
            .targets
            .entry(target.ip.clone())
            .or_insert(target)
            .clone())
    }

    async fn save_target(&self, target: &Target) -> Result<(), StoreError> {
        self.lock()
            .targets
            .insert(target.ip.clone(), target.clone());
        Ok(())
    }

    async fn delete_target(&self, ip: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.targets.remove(ip);
        inner.services.retain(|(i, _), _| i != ip);
        inner.vhosts.retain(|(i, _), _| i != ip);
        inner.technologies.retain(|(i, _, _, _), _| i != ip);
        inner.links.retain(|(i, _), _| i != ip);
        Ok(())
    }

    async fn services(&self, ip: &str) -> Result<Vec<Service>, StoreError> {
        Ok(self
            .lock()
            .services
            .iter()
            .filter(|((i, _), _)| i == ip)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_or_create_service(&self, service: Service) -> Result<Service, StoreError> {
        let key = (service.target_ip.clone(), service.port);
        let mut inner = self.lock();
        Ok(inner.services.entry(key).or_insert(service).clone())
    }

    async fn vhosts(&self, ip: &str) -> Result<Vec<VirtualHost>, StoreError> {
        Ok(self
            .lock()
            .vhosts
            .iter()
            .filter(|((i, _), _)| i == ip)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_or_create_vhost(&self, vhost: VirtualHost) -> Result<VirtualHost, StoreError> {
        let key = (vhost.target_ip.clone(), vhost.domain.clone());
        let mut inner = self.lock();
        Ok(inner.vhosts.entry(key).or_insert(vhost).clone())
    }

    async fn get_or_create_technology(
        &self,
        tech: Technology,
    ) -> Result<Technology, StoreError> {
        let key = (
            tech.target_ip.clone(),
            tech.domain.clone(),
            tech.name.clone(),
            tech.version.clone(),
        );
        let mut inner = self.lock();
        Ok(inner.technologies.entry(key).or_insert(tech).clone())
    }

    async fn links(&self, ip: &str, domain: &str) -> Result<ServiceLinks, StoreError> {
        let key = (ip.to_owned(), domain.to_owned());
        let mut inner = self.lock();
        Ok(inner
            .links
            .entry(key)
            .or_insert_with(|| ServiceLinks::new(ip, domain))
            .clone())
    }

    async fn save_links(&self, links: &ServiceLinks) -> Result<(), StoreError> {
        let key = (links.target_ip.clone(), links.domain.clone());
        self.lock().links.insert(key, links.clone());
        Ok(())
    }

    async fn add_path_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: PathEntry,
    ) -> Result<(), StoreError> {
        let key = (ip.to_owned(), domain.to_owned());
        let mut inner = self.lock();
        let links = inner
            .links
            .entry(key)
            .or_insert_with(|| ServiceLinks::new(ip, domain));
        if !links.directories.iter().any(|d| d.path == entry.path) {
            links.directories.push(entry);
        }
        Ok(())
    }

    async fn add_robots_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: RobotsEntry,
    ) -> Result<(), StoreError> {
        let key = (ip.to_owned(), domain.to_owned());
        let mut inner = self.lock();
        let links = inner
            .links
            .entry(key)
            .or_insert_with(|| ServiceLinks::new(ip, domain));
        if !links
            .robots
            .iter()
            .any(|r| r.path == entry.path && r.kind == entry.kind)
        {
            links.robots.push(entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Protocol, RobotsKind};

    fn service(ip: &str, port: u16, name: &str) -> Service {
        Service {
            target_ip: ip.to_owned(),
            protocol: Protocol::Tcp,
            port,
            state: "open".to_owned(),
            reason: Some("syn-ack".to_owned()),
            name: Some(name.to_owned()),
            product: None,
            version: None,
            extrainfo: None,
            cpe: Vec::new(),
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_on_unique_keys() {
        let store = MemoryStore::new();

        let first = store
            .get_or_create_target(Target::new("10.0.0.1").with_hostname(Some("a".to_owned())))
            .await
            .unwrap();
        let second = store
            .get_or_create_target(Target::new("10.0.0.1").with_hostname(Some("b".to_owned())))
            .await
            .unwrap();

        // The first write wins; the second call returns the existing row.
        assert_eq!(first.hostname.as_deref(), Some("a"));
        assert_eq!(second.hostname.as_deref(), Some("a"));

        store.get_or_create_service(service("10.0.0.1", 80, "http")).await.unwrap();
        store.get_or_create_service(service("10.0.0.1", 80, "http-alt")).await.unwrap();
        store.get_or_create_service(service("10.0.0.1", 22, "ssh")).await.unwrap();

        let services = store.services("10.0.0.1").await.unwrap();
        assert_eq!(services.len(), 2);
    }

    #[tokio::test]
    async fn vhost_unique_per_target_and_domain() {
        let store = MemoryStore::new();

        for port in [80, 8080] {
            store
                .get_or_create_vhost(VirtualHost {
                    target_ip: "10.0.0.1".to_owned(),
                    domain: "admin.example.com".to_owned(),
                    port,
                })
                .await
                .unwrap();
        }

        let vhosts = store.vhosts("10.0.0.1").await.unwrap();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(vhosts[0].port, 80);
    }

    #[tokio::test]
    async fn technology_unique_per_host_name_and_version() {
        let store = MemoryStore::new();
        let tech = Technology {
            target_ip: "10.0.0.1".to_owned(),
            domain: "example.com".to_owned(),
            name: "nginx".to_owned(),
            version: "1.24".to_owned(),
            categories: vec!["Web servers".to_owned()],
            confidence: Some("100".to_owned()),
            group: None,
            detected_by: None,
        };

        store.get_or_create_technology(tech.clone()).await.unwrap();
        store.get_or_create_technology(tech.clone()).await.unwrap();

        let other_version = Technology {
            version: "1.25".to_owned(),
            ..tech
        };
        store.get_or_create_technology(other_version).await.unwrap();

        let inner = store.lock();
        assert_eq!(inner.technologies.len(), 2);
    }

    #[tokio::test]
    async fn delete_target_cascades() {
        let store = MemoryStore::new();
        store.get_or_create_target(Target::new("10.0.0.1")).await.unwrap();
        store.get_or_create_service(service("10.0.0.1", 80, "http")).await.unwrap();
        store
            .add_path_entry(
                "10.0.0.1",
                "example.com",
                PathEntry {
                    path: "/admin".to_owned(),
                    status: 200,
                    size: 10,
                    words: 2,
                    lines: 1,
                },
            )
            .await
            .unwrap();

        store.delete_target("10.0.0.1").await.unwrap();

        assert!(store.get_target("10.0.0.1").await.unwrap().is_none());
        assert!(store.services("10.0.0.1").await.unwrap().is_empty());
        let links = store.links("10.0.0.1", "example.com").await.unwrap();
        assert!(links.directories.is_empty());
    }

    #[tokio::test]
    async fn path_entries_deduplicate_by_path() {
        let store = MemoryStore::new();
        let entry = PathEntry {
            path: "/admin".to_owned(),
            status: 200,
            size: 10,
            words: 2,
            lines: 1,
        };

        store.add_path_entry("10.0.0.1", "example.com", entry.clone()).await.unwrap();
        store.add_path_entry("10.0.0.1", "example.com", entry).await.unwrap();

        let links = store.links("10.0.0.1", "example.com").await.unwrap();
        assert_eq!(links.directories.len(), 1);
    }

    #[tokio::test]
    async fn robots_entries_deduplicate_by_path_and_kind() {
        let store = MemoryStore::new();
        let entry = RobotsEntry {
            path: "/private".to_owned(),
            kind: RobotsKind::Disallowed,
            status: Some(403),
        };

        store.add_robots_entry("10.0.0.1", "example.com", entry.clone()).await.unwrap();
        store.add_robots_entry("10.0.0.1", "example.com", entry).await.unwrap();

        let links = store.links("10.0.0.1", "example.com").await.unwrap();
        assert_eq!(links.robots.len(), 1);
    }
}
