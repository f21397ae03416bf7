//! External port-scanner driver.
//!
//! Shells out to `nmap` with a profile-driven command line, writes text and
//! XML output into a temporary directory and post-processes the XML into the
//! normalized [`report::ScanReport`]. Profiles choose port sets, extra
//! arguments and NSE scripts; everything else is fixed policy.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod probe;
pub mod report;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nethawk_core::config::Section;
use nethawk_core::endpoint::ResolverError;
use nethawk_core::hosts::HostsError;
use nethawk_core::store::StoreError;
use tempfile::TempDir;

pub use report::ScanReport;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("nmap not found in PATH")]
    NmapNotFound,
    #[error("failed to launch nmap")]
    Spawn(#[source] std::io::Error),
    #[error("nmap exited with status {0}")]
    Failed(std::process::ExitStatus),
    #[error("scan output not found; run a scan first")]
    MissingOutput,
    #[error("failed to read scan output")]
    Io(#[from] std::io::Error),
    #[error("failed to parse nmap XML output")]
    Xml(#[from] roxmltree::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Hosts(#[from] HostsError),
}

/// Ports declared by a profile: inherit the defaults, disable scanning a
/// port list entirely, or an explicit nmap port spec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProfilePorts {
    #[default]
    Inherit,
    Disabled,
    Spec(String),
}

#[derive(Debug, Clone, Default)]
pub struct ScanProfile {
    pub ports: ProfilePorts,
    pub arguments: Option<String>,
    pub scripts: Option<String>,
}

/// The `nmap:` configuration section, normalized.
#[derive(Debug, Clone, Default)]
pub struct NmapConfig {
    pub profiles: BTreeMap<String, ScanProfile>,
    pub tcp_ports: Option<String>,
    pub udp_ports: Option<String>,
    pub min_rate: Option<u64>,
    pub max_retries: Option<u64>,
}

impl NmapConfig {
    pub fn from_section(section: &Section) -> Self {
        let mut profiles = BTreeMap::new();

        if let Some(mapping) = section.get("profiles").and_then(|v| v.as_mapping()) {
            for (name, _) in mapping {
                let Some(name) = name.as_str() else { continue };
                let profile_section = section.subsection("profiles").subsection(name);

                let ports = match profile_section.get("ports") {
                    Some(v) if v.as_bool() == Some(false) => ProfilePorts::Disabled,
                    Some(_) => profile_section
                        .get_csv_string("ports")
                        .map(ProfilePorts::Spec)
                        .unwrap_or_default(),
                    None => ProfilePorts::Inherit,
                };

                profiles.insert(
                    name.to_owned(),
                    ScanProfile {
                        ports,
                        arguments: profile_section.get_str("arguments"),
                        scripts: profile_section.get_str("scripts"),
                    },
                );
            }
        }

        let ports = section.subsection("ports");

        Self {
            profiles,
            tcp_ports: ports.get_csv_string("tcp"),
            udp_ports: ports.get_csv_string("udp"),
            min_rate: section.get_u64("min_rate"),
            max_retries: section.get_u64("max_retries"),
        }
    }

    /// Default TCP and UDP port sets in nmap's `T:...,U:...` syntax.
    pub fn formatted_default_ports(&self) -> String {
        let tcp = self
            .tcp_ports
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| format!("T:{s}"));
        let udp = self
            .udp_ports
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| format!("U:{s}"));

        match (tcp, udp) {
            (Some(t), Some(u)) => format!("{t},{u}"),
            (Some(t), None) => t,
            (None, Some(u)) => u,
            (None, None) => String::new(),
        }
    }
}

/// One configured scanner run against a single host.
pub struct PortScanner {
    host: String,
    config: NmapConfig,
    profile_name: Option<String>,
    version: bool,
    verbose: bool,
    nmap_path: PathBuf,
    results_dir: TempDir,
    scan_count: u32,
    last_raw: Option<PathBuf>,
    last_xml: Option<PathBuf>,
}

impl PortScanner {
    pub fn new(
        host: impl Into<String>,
        config: NmapConfig,
        profile: Option<&str>,
        version: bool,
    ) -> Result<Self, ScanError> {
        let nmap_path = find_nmap().ok_or(ScanError::NmapNotFound)?;
        let results_dir = TempDir::with_prefix("nmap_scan_")?;

        Ok(Self {
            host: host.into(),
            config,
            profile_name: profile.map(str::to_owned),
            version,
            verbose: false,
            nmap_path,
            results_dir,
            scan_count: 0,
            last_raw: None,
            last_xml: None,
        })
    }

    /// Passes `-v` through to nmap.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn profile(&self) -> ScanProfile {
        self.profile_name
            .as_deref()
            .and_then(|name| self.config.profiles.get(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn formatted_default_ports(&self) -> String {
        self.config.formatted_default_ports()
    }

    /// Builds the full command line for a run.
    pub fn build_command(
        &self,
        ports: Option<&str>,
        sudo: bool,
        verbose: bool,
        raw_out: &Path,
        xml_out: &Path,
    ) -> Vec<String> {
        let profile = self.profile();
        let args_str = profile.arguments.clone().unwrap_or_default();

        let effective_ports = if profile.ports == ProfilePorts::Disabled {
            tracing::warn!(
                "[{}] Profile ports are disabled and cannot be overridden.",
                self.profile_name.as_deref().unwrap_or("default").to_uppercase()
            );
            None
        } else {
            let requested = ports.map(str::to_owned).or(match profile.ports {
                ProfilePorts::Spec(spec) => Some(spec),
                _ => None,
            });
            match requested.as_deref() {
                None | Some("default") | Some("") => {
                    Some(self.formatted_default_ports()).filter(|s| !s.is_empty())
                }
                Some(_) => requested,
            }
        };

        let mut has_tcp = false;
        let mut has_udp = false;
        if let Some(spec) = effective_ports.as_deref() {
            if spec.contains("U:") {
                has_udp = true;
            }
            if spec.contains("T:") || (spec.contains(',') && !has_udp) {
                has_tcp = true;
            }
        }

        let mut cmd = Vec::new();
        if sudo {
            cmd.push("sudo".to_owned());
        }
        cmd.push(self.nmap_path.to_string_lossy().into_owned());
        cmd.push(self.host.clone());

        if !args_str.contains("-sS") && has_tcp {
            cmd.push("-sS".to_owned());
        }
        if !args_str.contains("-sU") && has_udp {
            cmd.push("-sU".to_owned());
        }
        if !args_str.contains("-sV") && self.version {
            cmd.push("-sV".to_owned());
        }

        cmd.extend(args_str.split_whitespace().map(str::to_owned));

        if let Some(spec) = &effective_ports {
            cmd.push("-p".to_owned());
            cmd.push(spec.clone());
        }

        if !args_str.contains("--min-rate") {
            if let Some(rate) = self.config.min_rate {
                cmd.push("--min-rate".to_owned());
                cmd.push(rate.to_string());
            }
        }
        if !args_str.contains("--max-retries") {
            if let Some(retries) = self.config.max_retries {
                cmd.push("--max-retries".to_owned());
                cmd.push(retries.to_string());
            }
        }

        if let Some(scripts) = &profile.scripts {
            cmd.push("--script".to_owned());
            cmd.push(scripts.clone());
        }

        cmd.push("-oN".to_owned());
        cmd.push(raw_out.to_string_lossy().into_owned());
        cmd.push("-oX".to_owned());
        cmd.push(xml_out.to_string_lossy().into_owned());

        if verbose {
            cmd.push("-v".to_owned());
        }

        cmd
    }

    /// Runs the scanner, streaming its stdout when `output` is set.
    pub async fn scan(&mut self, ports: Option<&str>, output: bool) -> Result<(), ScanError> {
        self.scan_count += 1;
        let label = format!("scan_{}", self.scan_count);
        let raw_out = self.results_dir.path().join(format!("{label}.nmap"));
        let xml_out = self.results_dir.path().join(format!("{label}.xml"));

        let cmd = self.build_command(ports, false, self.verbose, &raw_out, &xml_out);
        tracing::debug!("Executing command: {}", cmd.join(" "));

        let mut child = tokio::process::Command::new(&cmd[0])
            .args(&cmd[1..])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(ScanError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if output {
                    println!("{line}");
                } else {
                    tracing::trace!("{line}");
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(ScanError::Failed(status));
        }

        self.last_raw = Some(raw_out);
        self.last_xml = Some(xml_out);
        Ok(())
    }

    /// Parses the XML output of the last scan.
    pub fn report(&self) -> Result<ScanReport, ScanError> {
        let xml_path = self.last_xml.as_ref().ok_or(ScanError::MissingOutput)?;
        let xml = std::fs::read_to_string(xml_path)?;
        ScanReport::parse(&xml)
    }
}

fn find_nmap() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join("nmap"))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nethawk_core::config::Config;

    fn test_config() -> NmapConfig {
        let config = Config::from_str_for_tests(
            r#"
nmap:
  min_rate: 1000
  max_retries: 2
  ports:
    tcp: "1-65535"
    udp: [53, 161]
  profiles:
    initial:
      arguments: "-Pn -T4"
    full:
      ports: false
      arguments: "-Pn -A"
    udp:
      ports: "U:53,161"
      arguments: "-Pn"
      scripts: "default"
"#,
        );
        NmapConfig::from_section(&config.section("nmap"))
    }

    fn scanner(profile: Option<&str>) -> PortScanner {
        PortScanner {
            host: "10.0.0.1".to_owned(),
            config: test_config(),
            profile_name: profile.map(str::to_owned),
            version: false,
            verbose: false,
            nmap_path: PathBuf::from("/usr/bin/nmap"),
            results_dir: TempDir::new().unwrap(),
            scan_count: 0,
            last_raw: None,
            last_xml: None,
        }
    }

    #[test]
    fn default_ports_combine_tcp_and_udp() {
        assert_eq!(
            test_config().formatted_default_ports(),
            "T:1-65535,U:53,161"
        );
    }

    #[test]
    fn command_uses_defaults_and_scan_flags() {
        let scanner = scanner(Some("initial"));
        let cmd = scanner.build_command(
            None,
            false,
            false,
            Path::new("/tmp/x.nmap"),
            Path::new("/tmp/x.xml"),
        );

        assert_eq!(cmd[0], "/usr/bin/nmap");
        assert_eq!(cmd[1], "10.0.0.1");
        assert!(cmd.contains(&"-sS".to_owned()));
        assert!(cmd.contains(&"-sU".to_owned()));
        let p = cmd.iter().position(|a| a == "-p").unwrap();
        assert_eq!(cmd[p + 1], "T:1-65535,U:53,161");
        let rate = cmd.iter().position(|a| a == "--min-rate").unwrap();
        assert_eq!(cmd[rate + 1], "1000");
    }

    #[test]
    fn explicit_ports_override_defaults() {
        let scanner = scanner(Some("initial"));
        let cmd = scanner.build_command(
            Some("T:22,80"),
            false,
            false,
            Path::new("/tmp/x.nmap"),
            Path::new("/tmp/x.xml"),
        );

        let p = cmd.iter().position(|a| a == "-p").unwrap();
        assert_eq!(cmd[p + 1], "T:22,80");
        assert!(cmd.contains(&"-sS".to_owned()));
        assert!(!cmd.contains(&"-sU".to_owned()));
    }

    #[test]
    fn disabled_profile_ports_cannot_be_overridden() {
        let scanner = scanner(Some("full"));
        let cmd = scanner.build_command(
            Some("T:80"),
            false,
            false,
            Path::new("/tmp/x.nmap"),
            Path::new("/tmp/x.xml"),
        );

        assert!(!cmd.contains(&"-p".to_owned()));
        assert!(!cmd.contains(&"-sS".to_owned()));
    }

    #[test]
    fn profile_scripts_and_version_flag() {
        let mut scanner = scanner(Some("udp"));
        scanner.version = true;
        let cmd = scanner.build_command(
            None,
            false,
            false,
            Path::new("/tmp/x.nmap"),
            Path::new("/tmp/x.xml"),
        );

        assert!(cmd.contains(&"-sV".to_owned()));
        assert!(cmd.contains(&"-sU".to_owned()));
        assert!(!cmd.contains(&"-sS".to_owned()));
        let script = cmd.iter().position(|a| a == "--script").unwrap();
        assert_eq!(cmd[script + 1], "default");
        let p = cmd.iter().position(|a| a == "-p").unwrap();
        assert_eq!(cmd[p + 1], "U:53,161");
    }

    #[test]
    fn sudo_prefixes_the_command() {
        let scanner = scanner(None);
        let cmd = scanner.build_command(
            Some("T:80"),
            true,
            false,
            Path::new("/tmp/x.nmap"),
            Path::new("/tmp/x.xml"),
        );

        assert_eq!(cmd[0], "sudo");
        assert_eq!(cmd[1], "/usr/bin/nmap");
    }
}
