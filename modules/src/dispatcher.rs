//! Strategy selection and execution.
//!
//! The tuple `(service, modules)` picks exactly one of three strategies:
//!
//! | service | modules   | strategy         |
//! |---------|-----------|------------------|
//! | unset   | any/empty | ServiceDiscovery |
//! | set     | empty     | ServiceListeners |
//! | set     | non-empty | ServiceModules   |
//! | unset   | non-empty | InvalidDispatch  |
//!
//! Every strategy no-ops when the resolver reports a fatal error; a failed
//! TCP connect is not fatal because the port scanner may still reach the
//! host.

use nethawk_core::endpoint::{self, Endpoint, ResolverError};
use nethawk_core::module::{execute, ModuleContext, ModuleError};
use nethawk_logging::err_with_src;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid dispatcher selection: modules were given without a service")]
    InvalidDispatch,
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ServiceDiscovery,
    ServiceListeners,
    ServiceModules,
}

/// Total over all valid input tuples; fails only on modules without service.
pub fn select_strategy(
    service: Option<&str>,
    modules: &[String],
) -> Result<Strategy, DispatchError> {
    match (service, modules.is_empty()) {
        (None, true) => Ok(Strategy::ServiceDiscovery),
        (None, false) => Err(DispatchError::InvalidDispatch),
        (Some(_), true) => Ok(Strategy::ServiceListeners),
        (Some(_), false) => Ok(Strategy::ServiceModules),
    }
}

pub struct Dispatcher {
    target: Option<String>,
    ports: Option<Vec<u16>>,
    service: Option<String>,
    modules: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        target: Option<String>,
        ports: Option<Vec<u16>>,
        service: Option<String>,
        modules: Option<String>,
    ) -> Self {
        let modules = match modules {
            Some(raw) if !raw.eq_ignore_ascii_case("none") => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            target,
            ports,
            service,
            modules,
        }
    }

    pub async fn run(&self, ctx: &ModuleContext) -> Result<(), DispatchError> {
        let strategy = select_strategy(self.service.as_deref(), &self.modules)?;

        tracing::debug!(
            ?strategy,
            target = ?self.target,
            ports = ?self.ports,
            service = ?self.service,
            modules = ?self.modules,
            "Executing dispatch strategy"
        );

        let Some(target) = self.target.as_deref() else {
            tracing::warn!("No target given, nothing to dispatch.");
            return Ok(());
        };

        let endpoint = self.resolve(target).await?;
        if let Some(error) = endpoint.fatal_error() {
            tracing::error!("{error}");
            return Ok(());
        }

        match strategy {
            Strategy::ServiceDiscovery => self.service_discovery(ctx, target, &endpoint).await,
            Strategy::ServiceListeners => self.service_listeners(ctx, target).await,
            Strategy::ServiceModules => self.service_modules(ctx, target).await,
        }
    }

    async fn resolve(&self, target: &str) -> Result<Endpoint, ResolverError> {
        let port = self.ports.as_ref().and_then(|p| p.first().copied());
        endpoint::resolve(target, port).await
    }

    /// Full discovery: one nmap run, then listeners for every persisted
    /// service.
    async fn service_discovery(
        &self,
        ctx: &ModuleContext,
        target: &str,
        endpoint: &Endpoint,
    ) -> Result<(), DispatchError> {
        match ctx.registry.find_module("nmap") {
            Ok(nmap) => {
                if let Err(e) = execute(ctx, &*nmap, Some(target), None).await {
                    tracing::error!("nmap failed: {}", err_with_src(&e));
                }
            }
            Err(e) => {
                tracing::error!("{e}");
                return Ok(());
            }
        }

        let Some(ip) = endpoint.ip else {
            return Ok(());
        };

        let services = ctx.store.services(&ip.to_string()).await.map_err(ModuleError::from)?;
        if services.is_empty() {
            tracing::error!("No Services Data found on database.");
            return Ok(());
        }

        for service in services {
            let Some(name) = service.name.as_deref() else {
                continue;
            };

            let Some(handler) = ctx.registry.get_service(name) else {
                tracing::warn!(
                    "No service handler found for {name} on port {}. Skipping scans...",
                    service.port
                );
                continue;
            };

            tracing::debug!(
                handler = handler.name(),
                port = service.port,
                "Service handler found"
            );

            let ports = [service.port];
            handler
                .run_listeners(ctx, Some(target), Some(ports.as_slice()))
                .await?;
        }

        Ok(())
    }

    async fn service_listeners(
        &self,
        ctx: &ModuleContext,
        target: &str,
    ) -> Result<(), DispatchError> {
        let Some(service) = self.service.as_deref() else {
            return Ok(());
        };

        let handler = match ctx.registry.find_service(service) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!("{e}. Skipping scans...");
                return Ok(());
            }
        };

        handler
            .run_listeners(ctx, Some(target), self.ports.as_deref())
            .await?;

        Ok(())
    }

    async fn service_modules(
        &self,
        ctx: &ModuleContext,
        target: &str,
    ) -> Result<(), DispatchError> {
        let Some(service) = self.service.as_deref() else {
            return Ok(());
        };

        // The handler is only consulted for its default port here.
        let handler = match ctx.registry.find_service(service) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!("{e}. Skipping scans...");
                return Ok(());
            }
        };

        handler
            .run_modules(ctx, Some(target), self.ports.as_deref(), &self.modules)
            .await?;

        Ok(())
    }
}
