//! Virtual host enumeration.

use std::sync::Arc;

use async_trait::async_trait;

use nethawk_core::config::Section;
use nethawk_core::endpoint;
use nethawk_core::model::VirtualHost;
use nethawk_core::module::{
    Module, ModuleArgs, ModuleContext, ModuleError, ModuleGroup, ModuleInfo, OptionSpec,
};
use nethawk_fuzzer::vhost::VhostMode;
use nethawk_fuzzer::Fuzzer;
use nethawk_scanner::{probe, NmapConfig};

use super::dir::{fuzz_config_from_args, fuzz_option_specs};

pub struct VhostModule;

#[async_trait]
impl Module for VhostModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            path: "protocols/http/vhost",
            name: "vhost",
            group: ModuleGroup::Protocols,
            category: Some("http"),
            config_key: Some("http.vhost"),
            aliases: &[],
            description: "Virtual Host Enumeration...",
        }
    }

    fn options(&self, config: &Section) -> Vec<OptionSpec> {
        fuzz_option_specs(config, false)
    }

    async fn run(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        port: Option<u16>,
        args: &ModuleArgs,
    ) -> Result<(), ModuleError> {
        let Some(target) = target else {
            tracing::warn!("vhost module needs a target.");
            return Ok(());
        };

        let endpoint = endpoint::resolve(target, port)
            .await
            .map_err(anyhow::Error::new)?;

        if let Some(error) = &endpoint.error {
            tracing::error!("{error}");
            return Ok(());
        }
        let (Some(ip), Some(service_port), Some(url)) =
            (endpoint.ip, endpoint.port, endpoint.resolved_url.clone())
        else {
            return Ok(());
        };
        let Some(domain) = endpoint.hostname.clone() else {
            tracing::warn!("No hostname resolved for {ip}; vhost fuzzing needs a base domain.");
            return Ok(());
        };
        let ip = ip.to_string();

        let nmap_config = NmapConfig::from_section(&ctx.config.section("nmap"));
        let probed = probe::ensure_service(
            ctx.store.as_ref(),
            ctx.hosts.as_ref(),
            nmap_config,
            &endpoint,
            service_port,
        )
        .await
        .map_err(anyhow::Error::new)?;

        if probed.is_none() {
            tracing::warn!("No service information for {ip}:{service_port}, skipping.");
            return Ok(());
        }

        let config = fuzz_config_from_args(args)?;

        tracing::info!("URL: {url}");
        tracing::info!("THREADS: {}", config.threads);
        tracing::info!("RECURSION: {}", config.recursion);
        tracing::info!(
            "STATUS: {}",
            config
                .match_codes
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!("WORDLIST: {}", config.wordlist.display());

        let mode = VhostMode::new(config.clone(), url, ip.clone(), Arc::clone(&ctx.hosts));
        let fuzzer = Fuzzer::new(config, mode);
        let results = fuzzer.start(&domain).await.map_err(anyhow::Error::new)?;

        for result in results {
            // Every discovered vhost is pinned in the hosts file so later
            // modules can reach it by name.
            ctx.hosts
                .add_host(&ip, &result.path, true)
                .await
                .map_err(anyhow::Error::new)?;

            ctx.store
                .get_or_create_vhost(VirtualHost {
                    target_ip: ip.clone(),
                    domain: result.path,
                    port: service_port,
                })
                .await?;
        }

        Ok(())
    }
}
