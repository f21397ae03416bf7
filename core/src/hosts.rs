//! `/etc/hosts` maintenance.
//!
//! Discovered virtual hosts are pinned by appending `<ip>\t<hostname>` lines.
//! Writes go through `sudo tee -a` so the tool works when started without
//! full root but with sudo available.

use async_trait::async_trait;
use std::sync::Mutex;

const HOSTS_PATH: &str = "/etc/hosts";

#[derive(Debug, thiserror::Error)]
pub enum HostsError {
    #[error("failed to read {HOSTS_PATH}")]
    Read(#[source] std::io::Error),
    #[error("failed to append to {HOSTS_PATH}")]
    Write(#[source] std::io::Error),
    #[error("`{0}` exited unsuccessfully")]
    Command(String),
}

#[async_trait]
pub trait HostsWriter: Send + Sync {
    /// Appends a mapping, skipping if the hostname is already present.
    /// With `auto` unset the user is asked for confirmation first.
    async fn add_host(&self, ip: &str, hostname: &str, auto: bool) -> Result<(), HostsError>;
}

fn format_entry(ip: &str, hostname: &str) -> String {
    format!("{ip}\t{hostname}\n")
}

fn contains_host(content: &str, hostname: &str) -> bool {
    content.split_whitespace().any(|word| word == hostname)
}

/// The system hosts file.
pub struct EtcHosts;

impl EtcHosts {
    async fn read(&self) -> Result<String, HostsError> {
        match tokio::fs::read_to_string(HOSTS_PATH).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("No permission to read {HOSTS_PATH} directly. Trying with sudo...");
                let output = tokio::process::Command::new("sudo")
                    .arg("cat")
                    .arg(HOSTS_PATH)
                    .output()
                    .await
                    .map_err(HostsError::Read)?;
                if !output.status.success() {
                    return Err(HostsError::Command("sudo cat".to_owned()));
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Err(e) => Err(HostsError::Read(e)),
        }
    }

    async fn confirm(&self, ip: &str, hostname: &str) -> bool {
        let prompt = format!("[ASK] Add '{ip} {hostname}' to {HOSTS_PATH}? (y/N): ");
        let answer = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            print!("{prompt}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            line.trim().to_lowercase()
        })
        .await
        .unwrap_or_default();

        answer == "y"
    }
}

#[async_trait]
impl HostsWriter for EtcHosts {
    async fn add_host(&self, ip: &str, hostname: &str, auto: bool) -> Result<(), HostsError> {
        let content = self.read().await?;

        if contains_host(&content, hostname) {
            tracing::info!("{hostname} already exists in {HOSTS_PATH}.");
            return Ok(());
        }

        if !auto && !self.confirm(ip, hostname).await {
            tracing::info!("Skipped adding to {HOSTS_PATH}.");
            return Ok(());
        }

        let mut child = tokio::process::Command::new("sudo")
            .arg("tee")
            .arg("-a")
            .arg(HOSTS_PATH)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(HostsError::Write)?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin
                .write_all(format_entry(ip, hostname).as_bytes())
                .await
                .map_err(HostsError::Write)?;
        }

        let status = child.wait().await.map_err(HostsError::Write)?;
        if !status.success() {
            return Err(HostsError::Command("sudo tee".to_owned()));
        }

        tracing::info!("Hostname {hostname} successfully added to {HOSTS_PATH}");
        Ok(())
    }
}

/// Records mappings instead of touching the system; used by tests and
/// dry runs.
#[derive(Default)]
pub struct MemoryHosts {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemoryHosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl HostsWriter for MemoryHosts {
    async fn add_host(&self, ip: &str, hostname: &str, _auto: bool) -> Result<(), HostsError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !entries.iter().any(|(_, h)| h == hostname) {
            entries.push((ip.to_owned(), hostname.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_format_is_tab_separated() {
        assert_eq!(format_entry("10.0.0.1", "admin.example.com"), "10.0.0.1\tadmin.example.com\n");
    }

    #[test]
    fn detects_existing_hostnames() {
        let content = "127.0.0.1\tlocalhost\n10.0.0.1\tadmin.example.com\n";

        assert!(contains_host(content, "admin.example.com"));
        assert!(!contains_host(content, "example.com"));
    }

    #[tokio::test]
    async fn memory_hosts_records_and_deduplicates() {
        let hosts = MemoryHosts::new();

        hosts.add_host("10.0.0.1", "a.example.com", true).await.unwrap();
        hosts.add_host("10.0.0.1", "a.example.com", true).await.unwrap();

        assert_eq!(hosts.entries().len(), 1);
    }
}
