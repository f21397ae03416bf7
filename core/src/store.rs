//! Document store abstraction.
//!
//! The engine only relies on get / get-or-create / delete-by-key / save over
//! the collections in [`crate::model`]; get-or-create must be idempotent on
//! each entity's unique-key tuple. [`MongoStore`] is the production backend,
//! [`MemoryStore`] backs tests and acts as a degraded fallback when MongoDB
//! is unreachable.

mod memory;
mod mongo;

use async_trait::async_trait;

use crate::model::{
    PathEntry, RobotsEntry, Service, ServiceLinks, Target, Technology, VirtualHost,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database operation failed")]
    Mongo(#[from] mongodb::error::Error),
    #[error("could not reach MongoDB at {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_target(&self, ip: &str) -> Result<Option<Target>, StoreError>;

    /// Returns the existing target for `target.ip`, or persists and returns
    /// the given one.
    async fn get_or_create_target(&self, target: Target) -> Result<Target, StoreError>;

    async fn save_target(&self, target: &Target) -> Result<(), StoreError>;

    /// Deletes the target and everything persisted under it.
    async fn delete_target(&self, ip: &str) -> Result<(), StoreError>;

    async fn services(&self, ip: &str) -> Result<Vec<Service>, StoreError>;

    async fn get_or_create_service(&self, service: Service) -> Result<Service, StoreError>;

    async fn vhosts(&self, ip: &str) -> Result<Vec<VirtualHost>, StoreError>;

    async fn get_or_create_vhost(&self, vhost: VirtualHost) -> Result<VirtualHost, StoreError>;

    async fn get_or_create_technology(&self, tech: Technology)
        -> Result<Technology, StoreError>;

    /// Fetches the link buckets for a vhost, creating an empty document on
    /// first access.
    async fn links(&self, ip: &str, domain: &str) -> Result<ServiceLinks, StoreError>;

    async fn save_links(&self, links: &ServiceLinks) -> Result<(), StoreError>;

    async fn add_path_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: PathEntry,
    ) -> Result<(), StoreError>;

    async fn add_robots_entry(
        &self,
        ip: &str,
        domain: &str,
        entry: RobotsEntry,
    ) -> Result<(), StoreError>;
}
