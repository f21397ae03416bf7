//! `nethawk` binary: argument validation, boot wiring, dispatch.

mod banner;
mod options;

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use nethawk_core::config::Config;
use nethawk_core::hosts::EtcHosts;
use nethawk_core::module::{execute, ModuleContext};
use nethawk_core::registry::Registry;
use nethawk_core::store::{MemoryStore, MongoStore, Store};
use nethawk_logging::err_with_src;
use nethawk_modules::dispatcher::Dispatcher;
use options::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let mut registry = Registry::new();
    nethawk_modules::register_all(&mut registry);
    let registry = Arc::new(registry);

    let argv: Vec<String> = std::env::args().collect();
    let options = Options::from_argv(&argv, &registry);

    nethawk_logging::setup_global_subscriber(options.verbose, options.debug)?;

    let mut config = match &options.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    tracing::info!("Using config file: {}", config.path().display());

    if options.publish {
        config
            .republish()
            .context("failed to merge the config template")?;
        return Ok(());
    }

    if options.list_modules {
        list_modules(&registry, options.service.as_deref().unwrap_or_default());
        return Ok(());
    }

    if let Some(name) = &options.show_module {
        show_module(&registry, &config, name);
        return Ok(());
    }

    banner::logo();

    let store = connect_store(&config).await;
    let ctx = ModuleContext {
        config: Arc::new(config),
        store,
        registry: Arc::clone(&registry),
        hosts: Arc::new(EtcHosts),
        argv: argv.clone(),
    };

    let work = run_work(&options, &ctx);

    tokio::select! {
        result = work => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt by user. All pending tasks will be cancelled.");
        }
    }

    Ok(())
}

async fn run_work(options: &Options, ctx: &ModuleContext) -> Result<()> {
    if options.nmap {
        match ctx.registry.find_module("nmap") {
            Ok(nmap) => execute(ctx, &*nmap, options.target.as_deref(), None)
                .await
                .map_err(anyhow::Error::new)?,
            Err(e) => tracing::error!("{e}"),
        }
        return Ok(());
    }

    if options.has_work() {
        Dispatcher::new(
            options.target.clone(),
            options.port_list(),
            options.service.clone(),
            options.module.clone(),
        )
        .run(ctx)
        .await
        .map_err(anyhow::Error::new)?;
    }

    Ok(())
}

async fn connect_store(config: &Config) -> Arc<dyn Store> {
    match MongoStore::connect_or_bootstrap(config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                "{}; falling back to the in-memory store, results will not be persisted",
                err_with_src(&e)
            );
            Arc::new(MemoryStore::new())
        }
    }
}

fn list_modules(registry: &Registry, service: &str) {
    let rows: Vec<_> = registry
        .describe_modules()
        .into_iter()
        .filter(|info| info.category == Some(service))
        .collect();

    if rows.is_empty() {
        eprintln!(
            "{}",
            style(format!("No modules found for service: '{service}'")).red().bold()
        );
        return;
    }

    println!(
        "{:<12} {:<55} {:<10} {}",
        style("NAME").cyan(),
        "DESCRIPTION",
        style("CATEGORY").green(),
        style("GROUP").yellow()
    );
    for info in rows {
        println!(
            "{:<12} {:<55} {:<10} {}",
            style(info.name).cyan(),
            info.description,
            style(info.category.unwrap_or("-")).green(),
            style(info.group.as_str()).yellow()
        );
    }
}

fn show_module(registry: &Registry, config: &Config, name: &str) {
    let module = match registry.find_module(name) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("{}", style(e).red().bold());
            std::process::exit(1);
        }
    };

    let info = module.info();
    let section = config.section(info.config_key.unwrap_or(""));
    let specs = module.options(&section);

    println!("{} - {}\n", style(info.name).cyan().bold(), info.description);

    if specs.is_empty() {
        println!("This module declares no options.");
        return;
    }

    println!("{:<28} {:<55} {}", style("ARGUMENT").cyan(), "DESCRIPTION", style("DEFAULT").green());
    for spec in specs {
        let flag = match spec.short {
            Some(short) => format!("--{}, -{short}", spec.long),
            None => format!("--{}", spec.long),
        };
        println!(
            "{:<28} {:<55} {}",
            style(flag).cyan(),
            spec.help,
            style(spec.default.as_deref().unwrap_or("-")).green()
        );
    }
}
