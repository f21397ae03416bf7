//! Virtual-host enumeration via the `Host:` header.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use nethawk_core::hosts::HostsWriter;

use crate::engine::{FuzzMode, ResponseMeta};
use crate::{random_string, FuzzConfig, FuzzError};

pub struct VhostMode {
    config: FuzzConfig,
    /// Requests always go to the resolved target; only the `Host:` header
    /// varies.
    target_url: String,
    target_ip: String,
    hosts: Arc<dyn HostsWriter>,
}

impl VhostMode {
    pub fn new(
        config: FuzzConfig,
        target_url: impl Into<String>,
        target_ip: impl Into<String>,
        hosts: Arc<dyn HostsWriter>,
    ) -> Self {
        Self {
            config,
            target_url: target_url.into(),
            target_ip: target_ip.into(),
            hosts,
        }
    }

    fn read_wordlist(&self) -> Result<Vec<String>, FuzzError> {
        let path = &self.config.wordlist;

        if !path.exists() {
            return Err(FuzzError::WordlistNotFound(path.clone()));
        }
        if !path.is_file() {
            return Err(FuzzError::WordlistNotAFile(path.clone()));
        }

        let raw = std::fs::read_to_string(path).map_err(|source| FuzzError::WordlistIo {
            path: path.clone(),
            source,
        })?;

        Ok(raw
            .lines()
            .map(sanitize_subdomain)
            .filter(|line| !line.is_empty())
            .collect())
    }
}

/// Keeps only `[a-z0-9-]`, lowercasing the rest away.
pub fn sanitize_subdomain(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

#[async_trait]
impl FuzzMode for VhostMode {
    fn entries(&self, base: &str) -> Result<Vec<String>, FuzzError> {
        let words = self.read_wordlist()?;

        let mut entries = Vec::with_capacity(words.len() + 1);
        entries.push(format!("{}.{base}", random_string(10)));

        for word in words {
            entries.push(format!("{word}.{base}"));
        }

        Ok(entries)
    }

    async fn fetch(&self, client: &Client, entry: &str) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = client.get(&self.target_url).header(reqwest::header::HOST, entry);

        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request.send().await
    }

    async fn recurse_base(
        &self,
        entry: &str,
        meta: &ResponseMeta,
        _body: &str,
    ) -> Result<Option<String>, FuzzError> {
        // The mapping is pinned before the host is explored further.
        self.hosts
            .add_host(&self.target_ip, &meta.path, true)
            .await?;

        Ok(Some(entry.to_owned()))
    }
}
