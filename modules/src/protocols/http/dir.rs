//! Content discovery via directory fuzzing.

use async_trait::async_trait;

use nethawk_core::config::Section;
use nethawk_core::endpoint;
use nethawk_core::model::{PathEntry, VirtualHost};
use nethawk_core::module::{
    Module, ModuleArgs, ModuleContext, ModuleError, ModuleGroup, ModuleInfo, OptionSpec,
};
use nethawk_fuzzer::dir::DirectoryMode;
use nethawk_fuzzer::{FuzzConfig, Fuzzer};
use nethawk_scanner::{probe, NmapConfig};

pub struct DirModule;

/// Option schema shared by the fuzzing modules; defaults come from the
/// module's config section.
pub(crate) fn fuzz_option_specs(config: &Section, with_extensions: bool) -> Vec<OptionSpec> {
    let mut specs = vec![
        OptionSpec::value("wordlist", "Path to the wordlist file")
            .default_opt(config.get_str("wordlist")),
        OptionSpec::flag("recursion", "Enable recursive enumeration")
            .default_opt(config.get_bool("recursion").map(|b| b.to_string())),
        OptionSpec::value("recursion-depth", "Maximum recursion depth")
            .default_opt(config.get_csv_string("recursion-depth"))
            .default_or("3"),
        OptionSpec::value("threads", "Number of concurrent workers")
            .default_opt(config.get_csv_string("threads"))
            .default_or("10"),
        OptionSpec::value("timeout", "Request timeout in seconds")
            .default_opt(config.get_csv_string("timeout"))
            .default_or("5"),
        OptionSpec::value("match-code", "Comma-separated status codes treated as valid")
            .default_opt(config.get_csv_string("match_code"))
            .default_or("200,301,302,307,401"),
    ];

    if with_extensions {
        specs.push(
            OptionSpec::value("extensions", "Comma-separated file extensions to append")
                .default_opt(config.get_csv_string("extensions")),
        );
    }

    specs
}

pub(crate) fn fuzz_config_from_args(args: &ModuleArgs) -> Result<FuzzConfig, ModuleError> {
    let mut config = FuzzConfig::default();

    if let Some(wordlist) = args.get("wordlist") {
        config.wordlist = wordlist.into();
    }
    if let Some(threads) = args.get_parsed::<usize>("threads")? {
        config.threads = threads.max(1);
    }
    if let Some(timeout) = args.get_parsed::<f64>("timeout")? {
        config.timeout = std::time::Duration::from_secs_f64(timeout);
    }
    if let Some(depth) = args.get_parsed::<usize>("recursion-depth")? {
        config.max_depth = depth;
    }
    let match_codes = args.get_csv::<u16>("match-code")?;
    if !match_codes.is_empty() {
        config.match_codes = match_codes;
    }
    config.extensions = args.get_csv::<String>("extensions")?;
    config.recursion = args.flag("recursion");

    Ok(config)
}

#[async_trait]
impl Module for DirModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            path: "protocols/http/dir",
            name: "dir",
            group: ModuleGroup::Protocols,
            category: Some("http"),
            config_key: Some("http.dictionary"),
            aliases: &[],
            description: "Content Discovery Enumeration...",
        }
    }

    fn options(&self, config: &Section) -> Vec<OptionSpec> {
        fuzz_option_specs(config, true)
    }

    async fn run(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        port: Option<u16>,
        args: &ModuleArgs,
    ) -> Result<(), ModuleError> {
        let Some(target) = target else {
            tracing::warn!("dir module needs a target.");
            return Ok(());
        };

        let endpoint = endpoint::resolve(target, port)
            .await
            .map_err(anyhow::Error::new)?;

        // Fuzzing needs a reachable HTTP endpoint; any resolver error stops
        // this module.
        if let Some(error) = &endpoint.error {
            tracing::error!("{error}");
            return Ok(());
        }
        let (Some(ip), Some(service_port), Some(url)) =
            (endpoint.ip, endpoint.port, endpoint.resolved_url.clone())
        else {
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
                .join(",")
        );
        tracing::info!("EXTENSIONS: {}", config.extensions.join(","));
        tracing::info!("WORDLIST: {}", config.wordlist.display());

        let fuzzer = Fuzzer::new(config.clone(), DirectoryMode::new(config));
        let results = fuzzer.start(&url).await.map_err(anyhow::Error::new)?;

        let domain = endpoint.hostname.clone().unwrap_or_else(|| ip.clone());
        ctx.store
            .get_or_create_vhost(VirtualHost {
                target_ip: ip.clone(),
                domain: domain.clone(),
                port: service_port,
            })
            .await?;

        for result in results {
            ctx.store
                .add_path_entry(
                    &ip,
                    &domain,
                    PathEntry {
                        path: result.path,
                        status: result.status,
                        size: result.size,
                        words: result.words,
                        lines: result.lines,
                    },
                )
                .await?;
        }

        Ok(())
    }
}
