//! Shared execution contract for enumeration modules and service handlers.
//!
//! A module is a stateless unit of work: it declares metadata ([`ModuleInfo`])
//! and an option schema ([`OptionSpec`]), and [`execute`] runs it after
//! filtering the process argument stream down to the flags the module
//! declared. Service handlers group modules into listener suites that run at
//! discovery time, with pre/post hooks for subclass-style customization.

mod args;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, Section};
use crate::hosts::HostsWriter;
use crate::registry::Registry;
use crate::store::{Store, StoreError};

pub use args::{
    extract_module_args, parse_module_args, split_global_args, ModuleArgs, OptionSpec, ValueKind,
};

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("invalid value for `{flag}`: {reason}")]
    InvalidArgument { flag: String, reason: String },
    #[error("missing value for `{0}`")]
    MissingValue(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleGroup {
    Discovery,
    Protocols,
}

impl ModuleGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleGroup::Discovery => "discovery",
            ModuleGroup::Protocols => "protocols",
        }
    }
}

/// Static metadata declared by every module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    /// Fully-qualified registration path, e.g. `protocols/http/dir`.
    pub path: &'static str,
    pub name: &'static str,
    pub group: ModuleGroup,
    /// Service category this module belongs to, e.g. `http`.
    pub category: Option<&'static str>,
    /// Dotted configuration path supplying option defaults.
    pub config_key: Option<&'static str>,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
}

/// Dependencies injected into every module run.
///
/// Registries and configuration are process-wide and read-only after boot;
/// carrying them explicitly keeps dispatch deterministic under test.
#[derive(Clone)]
pub struct ModuleContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub hosts: Arc<dyn HostsWriter>,
    /// The raw process argument vector, used for module flag filtering.
    pub argv: Vec<String>,
}

#[async_trait]
pub trait Module: Send + Sync {
    fn info(&self) -> ModuleInfo;

    /// Declares the module's options; defaults typically come from `config`.
    fn options(&self, _config: &Section) -> Vec<OptionSpec> {
        Vec::new()
    }

    async fn run(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        port: Option<u16>,
        args: &ModuleArgs,
    ) -> Result<(), ModuleError>;
}

/// Parses the module's arguments out of the process argument stream and runs it.
pub async fn execute(
    ctx: &ModuleContext,
    module: &dyn Module,
    target: Option<&str>,
    port: Option<u16>,
) -> Result<(), ModuleError> {
    let info = module.info();
    let section = match info.config_key {
        Some(key) => ctx.config.section(key),
        None => ctx.config.section(""),
    };

    let specs = module.options(&section);
    let args = parse_module_args(&ctx.argv, &specs)?;

    tracing::debug!(module = info.name, ?target, ?port, "Dispatching module");

    module.run(ctx, target, port, &args).await
}

/// A service handler maps a discovered service to the enumeration workflows
/// that should run against it.
///
/// Variants differ only in identity, listener configuration and the three
/// hooks; the run loops are shared.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn group(&self) -> ModuleGroup;

    fn default_port(&self) -> Option<u16>;

    fn description(&self) -> &'static str {
        ""
    }

    /// Config section carrying this service's `listeners` list.
    fn listener_key(&self) -> &'static str {
        self.name()
    }

    fn listener_names(&self, config: &Config) -> Vec<String> {
        let section = config.section(self.listener_key());
        section
            .get_str_list("listeners")
            .or_else(|| section.get_str_list("listener"))
            .unwrap_or_default()
    }

    /// Gatekeeper to filter which modules should run.
    fn should_run_module(&self, _module: &dyn Module) -> bool {
        true
    }

    /// Optional hook before each module runs.
    async fn before_run(&self, _module: &dyn Module) {}

    /// Optional hook after each module runs.
    async fn after_run(&self, _module: &dyn Module) {}

    /// Runs every configured listener module, once per resolved port.
    ///
    /// A listener name that does not resolve to a registered module is
    /// logged and skipped; a failing module aborts neither the remaining
    /// listeners nor the overall run.
    async fn run_listeners(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        ports: Option<&[u16]>,
    ) -> Result<(), ModuleError> {
        let Some(ports) = self.resolve_ports(ports) else {
            return Ok(());
        };

        let listeners = self.listener_names(&ctx.config);
        if listeners.is_empty() {
            tracing::warn!("No listeners found on '{}' service.", self.name());
            return Ok(());
        }

        tracing::debug!(
            service = self.name(),
            ?ports,
            ?listeners,
            "Running service listeners"
        );

        for port in &ports {
            for name in &listeners {
                self.dispatch_module(ctx, name, target, *port).await;
            }
        }

        Ok(())
    }

    /// Runs exactly the named modules, once per resolved port.
    async fn run_modules(
        &self,
        ctx: &ModuleContext,
        target: Option<&str>,
        ports: Option<&[u16]>,
        modules: &[String],
    ) -> Result<(), ModuleError> {
        let Some(ports) = self.resolve_ports(ports) else {
            return Ok(());
        };

        for port in &ports {
            for name in modules {
                self.dispatch_module(ctx, name, target, *port).await;
            }
        }

        Ok(())
    }

    /// Passed-in ports win; otherwise the handler's default port. With
    /// neither, warn and skip.
    fn resolve_ports(&self, ports: Option<&[u16]>) -> Option<Vec<u16>> {
        match ports {
            Some(ports) if !ports.is_empty() => Some(ports.to_vec()),
            _ => match self.default_port() {
                Some(port) => Some(vec![port]),
                None => {
                    tracing::warn!(
                        "No ports provided and no default port available for service '{}'.",
                        self.name()
                    );
                    None
                }
            },
        }
    }

    async fn dispatch_module(
        &self,
        ctx: &ModuleContext,
        name: &str,
        target: Option<&str>,
        port: u16,
    ) {
        let Some(module) = ctx.registry.get_module(name) else {
            tracing::error!(
                "No module '{name}' found on '{}' service. Skipping scans...",
                self.name()
            );
            return;
        };

        if !self.should_run_module(&*module) {
            return;
        }

        self.before_run(&*module).await;

        let info = module.info();
        if !info.description.is_empty() {
            tracing::info!("{}", info.description);
        }

        if let Err(e) = execute(ctx, &*module, target, Some(port)).await {
            tracing::error!(
                "{} failed: {}",
                info.name,
                nethawk_logging::err_with_src(&e)
            );
            return;
        }

        self.after_run(&*module).await;
    }
}
