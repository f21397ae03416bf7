//! Initial service discovery through the external port scanner.
//!
//! Without a profile this runs the two-stage sweep: a fast initial scan over
//! the configured port sets, then a full scan (version detection, OS
//! detection, default scripts) restricted to the ports found open. The
//! results replace whatever was previously persisted for the target.

use async_trait::async_trait;
use console::style;

use nethawk_core::config::Section;
use nethawk_core::endpoint::{self, Endpoint};
use nethawk_core::model::Target;
use nethawk_core::module::{
    Module, ModuleArgs, ModuleContext, ModuleError, ModuleGroup, ModuleInfo, OptionSpec,
};
use nethawk_scanner::report::ScanReport;
use nethawk_scanner::{NmapConfig, PortScanner};

pub struct NmapModule;

#[async_trait]
impl Module for NmapModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            path: "discovery/nmap",
            name: "nmap",
            group: ModuleGroup::Discovery,
            category: None,
            config_key: Some("nmap"),
            aliases: &[],
            description: "Performs Nmap initial scans & detailed scans",
        }
    }

    fn options(&self, _config: &Section) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("profile", "Named scan profile from the nmap config section"),
            OptionSpec::value("port", "Ports to scan, nmap syntax").short('p'),
            OptionSpec::flag("verbose", "Pass -v through to nmap").short('v'),
        ]
    }

    async fn run(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        port: Option<u16>,
        args: &ModuleArgs,
    ) -> Result<(), ModuleError> {
        let Some(target) = target else {
            tracing::warn!("nmap module needs a target.");
            return Ok(());
        };

        let endpoint = endpoint::resolve(target, port)
            .await
            .map_err(anyhow::Error::new)?;

        if let Some(error) = endpoint.fatal_error() {
            tracing::error!("{error}");
            return Ok(());
        }
        let Some(ip) = endpoint.ip else {
            return Ok(());
        };

        let nmap_config = NmapConfig::from_section(&ctx.config.section("nmap"));
        let verbose = args.flag("verbose");
        let ports_arg = args.get("port").map(str::to_owned);

        let report = match args.get("profile") {
            Some(profile) => {
                self.profile_scan(&ip.to_string(), nmap_config, profile, ports_arg.as_deref(), verbose)
                    .await?
            }
            None => {
                self.nse_scan(&ip.to_string(), nmap_config, ports_arg.as_deref(), verbose)
                    .await?
            }
        };

        self.persist(ctx, &endpoint, &ip.to_string(), &report).await
    }
}

impl NmapModule {
    async fn profile_scan(
        &self,
        ip: &str,
        config: NmapConfig,
        profile: &str,
        ports: Option<&str>,
        verbose: bool,
    ) -> Result<ScanReport, ModuleError> {
        tracing::info!("Running profile scans with {} scan type", profile.to_uppercase());

        let mut scanner = PortScanner::new(ip, config, Some(profile), false)
            .map_err(anyhow::Error::new)?
            .with_verbose(verbose);
        scanner.scan(ports, true).await.map_err(anyhow::Error::new)?;

        Ok(scanner.report().map_err(anyhow::Error::new)?)
    }

    async fn nse_scan(
        &self,
        ip: &str,
        config: NmapConfig,
        ports: Option<&str>,
        verbose: bool,
    ) -> Result<ScanReport, ModuleError> {
        let mut initial = PortScanner::new(ip, config.clone(), Some("initial"), false)
            .map_err(anyhow::Error::new)?
            .with_verbose(verbose);

        tracing::info!(
            "Scanning ports {} using TCP/SYN/UDP",
            initial.formatted_default_ports()
        );

        initial.scan(ports, false).await.map_err(anyhow::Error::new)?;
        let initial_report = initial.report().map_err(anyhow::Error::new)?;

        display_ports_table(&initial_report);

        let open_ports = initial_report.formatted_open_ports();
        if open_ports.is_empty() {
            tracing::error!("No ports found, Please try again.");
            return Ok(initial_report);
        }

        tracing::info!(
            "Running OS Detection, Version Enumeration, Traceroute, Default NSE Scripts."
        );

        let mut full = PortScanner::new(ip, config, Some("full"), false)
            .map_err(anyhow::Error::new)?
            .with_verbose(verbose);
        full.scan(Some(&open_ports), true)
            .await
            .map_err(anyhow::Error::new)?;

        Ok(full.report().map_err(anyhow::Error::new)?)
    }

    async fn persist(
        &self,
        ctx: &ModuleContext,
        endpoint: &Endpoint,
        ip: &str,
        report: &ScanReport,
    ) -> Result<(), ModuleError> {
        let vhost = report.vhost_hint();

        // Discovery replaces anything persisted from earlier runs.
        ctx.store.delete_target(ip).await?;

        ctx.store
            .get_or_create_target(
                Target::new(ip)
                    .with_hostname(vhost.clone().or_else(|| endpoint.hostname.clone()))
                    .with_os_guess(Some(endpoint.os_guess.clone())),
            )
            .await?;

        if let Some(vhost) = &vhost {
            ctx.hosts.add_host(ip, vhost, false).await.map_err(anyhow::Error::new)?;
        }

        for service in report.services(ip) {
            ctx.store.get_or_create_service(service).await?;
        }

        Ok(())
    }
}

fn display_ports_table(report: &ScanReport) {
    let ports = report.ports();
    if ports.is_empty() {
        return;
    }

    println!(
        "{:<16} {:<10} {:<16} {}",
        style("PORT").cyan(),
        style("STATE").blue(),
        style("SERVICE").red(),
        style("REASON").dim()
    );

    for port in ports {
        let reason = format!(
            "{} {}",
            port.reason.as_deref().unwrap_or("unknown"),
            port.reason_ttl.as_deref().unwrap_or("")
        );
        println!(
            "{:<16} {:<10} {:<16} {}",
            style(format!("{}/{}", port.port, port.protocol)).cyan().bold(),
            style(&port.state).green().bold(),
            style(port.service.as_deref().unwrap_or("unknown")).red().bold(),
            style(reason.trim()).yellow()
        );
    }
    println!();
}
