//! MongoDB-backed store.
//!
//! Collections are flat and keyed by the unique tuples documented in
//! [`crate::model`]; all cross-entity navigation happens through those keys.
//! If the configured server is down we try to start a local `mongod` once
//! before giving up, so a cold box still works out of the pocket.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Store, StoreError};
use crate::config::Config;
use crate::model::{
    PathEntry, RobotsEntry, Service, ServiceLinks, Target, Technology, VirtualHost,
};

const TARGETS: &str = "target_info";
const SERVICES: &str = "service_info";
const VHOSTS: &str = "host_info";
const TECHNOLOGIES: &str = "technology_entry";
const LINKS: &str = "service_links";

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let section = config.section("mongodb");
        let host = section.get_str("host").unwrap_or_else(|| "localhost".to_owned());
        let port = section.get_u64("port").unwrap_or(27017);
        let database = section
            .get_str("database")
            .unwrap_or_else(|| "nethawk".to_owned());

        let uri = format!("mongodb://{host}:{port}");
        let mut options = ClientOptions::parse(&uri).await?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);

        let client = Client::with_options(options)?;
        let db = client.database(&database);

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|_| StoreError::Unreachable(uri.clone()))?;

        tracing::debug!("Connected to MongoDB at {uri}/{database}");

        Ok(Self { db })
    }

    /// Connects, starting a local `mongod` once if the server is down.
    pub async fn connect_or_bootstrap(config: &Config) -> Result<Self, StoreError> {
        match Self::connect(config).await {
            Ok(store) => Ok(store),
            Err(StoreError::Unreachable(uri)) => {
                tracing::warn!("MongoDB not running at {uri}. Attempting to start it...");

                let section = config.section("mongodb");
                let dbpath = section
                    .get_str("path")
                    .unwrap_or_else(|| "/var/lib/mongodb".to_owned());
                let port = section.get_u64("port").unwrap_or(27017);

                spawn_mongod(&dbpath, port);
                tokio::time::sleep(Duration::from_secs(2)).await;

                Self::connect(config).await
            }
            Err(e) => Err(e),
        }
    }

    fn targets(&self) -> Collection<Target> {
        self.db.collection(TARGETS)
    }

    fn services_coll(&self) -> Collection<Service> {
        self.db.collection(SERVICES)
    }

    fn vhosts_coll(&self) -> Collection<VirtualHost> {
        self.db.collection(VHOSTS)
    }

    fn technologies(&self) -> Collection<Technology> {
        self.db.collection(TECHNOLOGIES)
    }

    fn links_coll(&self) -> Collection<ServiceLinks> {
        self.db.collection(LINKS)
    }

    async fn get_or_create<T>(
        &self,
        coll: Collection<T>,
        filter: mongodb::bson::Document,
        value: T,
    ) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        if let Some(existing) = coll.find_one(filter).await? {
            return Ok(existing);
        }

        coll.insert_one(&value).await?;
        Ok(value)
    }
}

fn spawn_mongod(dbpath: &str, port: u64) {
    let _ = std::fs::create_dir_all(dbpath);

    let spawned = tokio::process::Command::new("mongod")
        .arg("--dbpath")
        .arg(dbpath)
        .arg("--port")
        .arg(port.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();

    match spawned {
        Ok(_) => tracing::info!("Started mongod on port {port} with dbpath {dbpath}"),
        Err(e) => tracing::warn!("Failed to start mongod: {e}"),
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn get_target(&self, ip: &str) -> Result<Option<Target>, StoreError> {
        Ok(self.targets().find_one(doc! { "ip": ip }).await?)
    }

    async fn get_or_create_target(&self, target: Target) -> Result<Target, StoreError> {
        let filter = doc! { "ip": &target.ip };
        self.get_or_create(self.targets(), filter, target).await
    }

    async fn save_target(&self, target: &Target) -> Result<(), StoreError> {
        self.targets()
            .replace_one(doc! { "ip": &target.ip }, target)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete_target(&self, ip: &str) -> Result<(), StoreError> {
        self.targets().delete_many(doc! { "ip": ip }).await?;
        self.services_coll()
            .delete_many(doc! { "target_ip": ip })
            .await?;
        self.vhosts_coll()
            .delete_many(doc! { "target_ip": ip })
            .await?;
        self.technologies()
            .delete_many(doc! { "target_ip": ip })
            .await?;
        self.links_coll()
            .delete_many(doc! { "target_ip": ip })
            .await?;
        Ok(())
    }

    async fn services(&self, ip: &str) -> Result<Vec<Service>, StoreError> {
        let cursor = self.services_coll().find(doc! { "target_ip": ip }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_or_create_service(&self, service: Service) -> Result<Service, StoreError> {
        let filter = doc! { "target_ip": &service.target_ip, "port": i32::from(service.port) };
        self.get_or_create(self.services_coll(), filter, service).await
    }

    async fn vhosts(&self, ip: &str) -> Result<Vec<VirtualHost>, StoreError> {
        let cursor = self.vhosts_coll().find(doc! { "target_ip": ip }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_or_create_vhost(&self, vhost: VirtualHost) -> Result<VirtualHost, StoreError> {
        let filter = doc! { "target_ip": &vhost.target_ip, "domain": &vhost.domain };
        self.get_or_create(self.vhosts_coll(), filter, vhost).await
    }

    async fn get_or_create_technology(
        &self,
        tech: Technology,
    ) -> Result<Technology, StoreError> {
        let filter = doc! {
            "target_ip": &tech.target_ip,
            "domain": &tech.domain,
            "name": &tech.name,
            "version": &tech.version,
        };
        self.get_or_create(self.technologies(), filter, tech).await
    }

    async fn links(&self, ip: &str, domain: &str) -> Result<ServiceLinks, StoreError> {
        let filter = doc! { "target_ip": ip, "domain": domain };
        self.get_or_create(self.links_coll(), filter, ServiceLinks::new(ip, domain))
            .await
    }

    async fn save_links(&self, links: &ServiceLinks) -> Result<(), StoreError> {
        self.links_coll()
            .replace_one(
                doc! { "target_ip": &links.target_ip, "domain": &links.domain },
                links,
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn add_path_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: PathEntry,
    ) -> Result<(), StoreError> {
        let mut links = self.links(ip, domain).await?;
        if !links.directories.iter().any(|d| d.path == entry.path) {
            links.directories.push(entry);
            self.save_links(&links).await?;
        }
        Ok(())
    }

    async fn add_robots_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: RobotsEntry,
    ) -> Result<(), StoreError> {
        let mut links = self.links(ip, domain).await?;
        if !links
            .robots
            .iter()
            .any(|r| r.path == entry.path && r.kind == entry.kind)
        {
            links.robots.push(entry);
            self.save_links(&links).await?;
        }
        Ok(())
    }
}
