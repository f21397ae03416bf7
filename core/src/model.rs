//! Persisted data model.
//!
//! Reference-style schema: flat collections, one-way ownership (target owns
//! vhosts, vhosts own links, links own entries), reverse edges looked up by
//! unique key. Uniqueness is enforced by the store's get-or-create
//! operations, keyed as: target `(ip)`, service `(target, port)`, vhost
//! `(target, domain)`, technology `(host, name, version)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// A scanned host, unique per IP address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub ip: String,
    pub hostname: Option<String>,
    pub os_guess: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    pub fn new(ip: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            ip: ip.into(),
            hostname: None,
            os_guess: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    pub fn with_os_guess(mut self, os_guess: Option<String>) -> Self {
        self.os_guess = os_guess;
        self
    }
}

/// A classified network service, unique per `(target, port)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub target_ip: String,
    pub protocol: Protocol,
    pub port: u16,
    pub state: String,
    pub reason: Option<String>,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extrainfo: Option<String>,
    #[serde(default)]
    pub cpe: Vec<String>,
}

/// A virtual host on a target, unique per `(target, domain)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualHost {
    pub target_ip: String,
    pub domain: String,
    pub port: u16,
}

/// A detected technology, unique per `(host, name, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technology {
    pub target_ip: String,
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub confidence: Option<String>,
    pub group: Option<String>,
    pub detected_by: Option<String>,
}

/// Flat link buckets collected per virtual host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceLinks {
    pub target_ip: String,
    pub domain: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default)]
    pub audio: Vec<String>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub subdomain_links: Vec<String>,
    #[serde(default)]
    pub static_files: Vec<String>,
    #[serde(default)]
    pub javascript_files: Vec<String>,
    #[serde(default)]
    pub external_files: Vec<String>,
    #[serde(default)]
    pub other_links: Vec<String>,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
    #[serde(default)]
    pub robots: Vec<RobotsEntry>,
    #[serde(default)]
    pub directories: Vec<PathEntry>,
}

impl ServiceLinks {
    pub fn new(target_ip: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            target_ip: target_ip.into(),
            domain: domain.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub action: String,
    pub method: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub found_at: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotsKind {
    Allowed,
    Disallowed,
    Sitemap,
}

impl std::fmt::Display for RobotsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobotsKind::Allowed => f.write_str("allowed"),
            RobotsKind::Disallowed => f.write_str("disallowed"),
            RobotsKind::Sitemap => f.write_str("sitemap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsEntry {
    pub path: String,
    pub kind: RobotsKind,
    pub status: Option<u16>,
}

/// A discovered path, as produced by directory fuzzing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    pub status: u16,
    pub size: usize,
    pub words: usize,
    pub lines: usize,
}
