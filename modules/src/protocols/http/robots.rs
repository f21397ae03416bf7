//! robots.txt analysis.
//!
//! Fetches `/robots.txt`, splits it into Allowed / Disallowed / Sitemap
//! groups, probes every referenced path for its live status and persists the
//! entries under the target's vhost.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use console::style;
use futures::future::join_all;

use nethawk_core::endpoint;
use nethawk_core::model::{RobotsEntry, RobotsKind, Target, VirtualHost};
use nethawk_core::module::{
    Module, ModuleArgs, ModuleContext, ModuleError, ModuleGroup, ModuleInfo,
};
use nethawk_core::HTTP_TIMEOUT;

pub struct RobotsModule;

const STATUS_RETRIES: u32 = 3;

#[async_trait]
impl Module for RobotsModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            path: "protocols/http/robots",
            name: "robots",
            group: ModuleGroup::Protocols,
            category: Some("http"),
            config_key: None,
            aliases: &[],
            description: "Robots.txt Analysis (e.g, Allowed, Disallowed, Sitemap)",
        }
    }

    async fn run(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        port: Option<u16>,
        _args: &ModuleArgs,
    ) -> Result<(), ModuleError> {
        let Some(target) = target else {
            tracing::warn!("robots module needs a target.");
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
        let ip = ip.to_string();

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(anyhow::Error::new)?;

        let Some(robots_txt) = fetch_robots_txt(&client, &url).await else {
            return Ok(());
        };

        let (allowed, disallowed, sitemaps) = parse_robots(&robots_txt);

        let mut entries = Vec::new();
        entries.extend(probe_group(&client, "Allowed", RobotsKind::Allowed, &url, &allowed).await);
        entries.extend(
            probe_group(&client, "Disallowed", RobotsKind::Disallowed, &url, &disallowed).await,
        );

        // Sitemaps are expanded into the URLs they list before probing.
        let sitemap_urls = expand_sitemaps(&client, &sitemaps).await;
        entries
            .extend(probe_group(&client, "Sitemap", RobotsKind::Sitemap, &url, &sitemap_urls).await);

        let domain = endpoint.hostname.clone().unwrap_or_else(|| ip.clone());
        ctx.store
            .get_or_create_target(
                Target::new(&ip)
                    .with_hostname(endpoint.hostname.clone())
                    .with_os_guess(Some(endpoint.os_guess.clone())),
            )
            .await?;
        ctx.store
            .get_or_create_vhost(VirtualHost {
                target_ip: ip.clone(),
                domain: domain.clone(),
                port: service_port,
            })
            .await?;

        for entry in entries {
            ctx.store.add_robots_entry(&ip, &domain, entry).await?;
        }

        Ok(())
    }
}

async fn fetch_robots_txt(client: &reqwest::Client, base_url: &str) -> Option<String> {
    let robots_url = format!("{}/robots.txt", base_url.trim_end_matches('/'));
    tracing::info!("Checking {robots_url}");

    let response = match client.get(&robots_url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to fetch robots.txt: {e}");
            return None;
        }
    };

    match response.status().as_u16() {
        200 => response.text().await.ok(),
        404 => {
            tracing::info!("robots.txt not found");
            None
        }
        status => {
            tracing::error!("Unhandled robots.txt status ({status})");
            None
        }
    }
}

type Groups = (Vec<String>, Vec<String>, Vec<String>);

/// Splits a robots.txt document into sorted Allowed / Disallowed / Sitemap
/// path groups.
fn parse_robots(robots_txt: &str) -> Groups {
    let mut allowed = BTreeSet::new();
    let mut disallowed = BTreeSet::new();
    let mut sitemaps = BTreeSet::new();

    for line in robots_txt.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let lower = line.to_lowercase();
        let value = |l: &str| l.split_once(':').map(|(_, v)| v.trim().to_owned());

        if lower.starts_with("allow:") {
            allowed.extend(value(line));
        } else if lower.starts_with("disallow:") {
            disallowed.extend(value(line));
        } else if lower.starts_with("sitemap:") {
            sitemaps.extend(value(line));
        }
    }

    (
        allowed.into_iter().collect(),
        disallowed.into_iter().collect(),
        sitemaps.into_iter().collect(),
    )
}

/// Pulls `<loc>` entries out of every listed sitemap.
async fn expand_sitemaps(client: &reqwest::Client, sitemaps: &[String]) -> Vec<String> {
    let mut urls = Vec::new();

    for sitemap_url in sitemaps {
        match client.get(sitemap_url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                if let Ok(text) = response.text().await {
                    urls.extend(extract_loc_entries(&text));
                }
            }
            Ok(response) => {
                tracing::error!(
                    "Failed to fetch sitemap {sitemap_url}: status {}",
                    response.status()
                );
            }
            Err(e) => tracing::error!("Failed to fetch sitemap {sitemap_url}: {e}"),
        }
    }

    urls
}

fn extract_loc_entries(xml: &str) -> Vec<String> {
    xml.split("<loc>")
        .skip(1)
        .filter_map(|chunk| chunk.split("</loc>").next())
        .map(|loc| loc.trim().to_owned())
        .filter(|loc| !loc.is_empty())
        .collect()
}

async fn probe_group(
    client: &reqwest::Client,
    title: &str,
    kind: RobotsKind,
    base_url: &str,
    paths: &[String],
) -> Vec<RobotsEntry> {
    let paths: Vec<String> = paths
        .iter()
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect();
    if paths.is_empty() {
        return Vec::new();
    }

    let probes = paths.iter().map(|path| {
        let url = if path.starts_with("http") {
            path.clone()
        } else {
            format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
        };
        async move { status_with_retries(client, &url).await }
    });
    let statuses = join_all(probes).await;

    println!("\n[{title}]");
    let mut entries = Vec::with_capacity(paths.len());
    for (path, status) in paths.into_iter().zip(statuses) {
        let status_txt = match status {
            None => style("[Error]".to_owned()).red().bold(),
            Some(code @ 200..=299) => style(format!("[{code}]")).green(),
            Some(code @ 300..=399) => style(format!("[{code}]")).blue(),
            Some(code @ 400..=499) => style(format!("[{code}]")).magenta(),
            Some(code) => style(format!("[{code}]")).red(),
        };
        println!("    {path:<60} {status_txt}");

        entries.push(RobotsEntry { path, kind, status });
    }
    println!();

    entries
}

async fn status_with_retries(client: &reqwest::Client, url: &str) -> Option<u16> {
    for attempt in 0..STATUS_RETRIES {
        match client.get(url).send().await {
            Ok(response) => return Some(response.status().as_u16()),
            Err(e) => {
                tracing::debug!("Attempt {} failed for {url}: {e}", attempt + 1);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }

    None
}
