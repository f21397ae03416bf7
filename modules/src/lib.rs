//! Enumeration modules, service handlers and the dispatch engine.
//!
//! Everything pluggable registers here: [`register_all`] populates the
//! process-wide registry with the built-in service handlers and modules at
//! boot, which keeps discovery explicit and deterministic under test.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod discovery;
pub mod dispatcher;
pub mod handlers;
pub mod protocols;

use std::sync::Arc;

use nethawk_core::registry::Registry;

/// Registers the built-in service handlers and modules.
pub fn register_all(registry: &mut Registry) {
    registry.register_service(Arc::new(handlers::HttpHandler));

    registry.register_module(Arc::new(discovery::nmap::NmapModule));
    registry.register_module(Arc::new(protocols::http::dir::DirModule));
    registry.register_module(Arc::new(protocols::http::vhost::VhostModule));
    registry.register_module(Arc::new(protocols::http::robots::RobotsModule));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let mut registry = Registry::new();
        register_all(&mut registry);

        assert!(registry.find_service("http").is_ok());
        assert!(registry.find_service("https").is_ok());
        assert!(registry.find_module("nmap").is_ok());
        assert!(registry.find_module("dir").is_ok());
        assert!(registry.find_module("vhost").is_ok());
        assert!(registry.find_module("robots").is_ok());
        assert!(registry.find_module("protocols/http/dir").is_ok());
    }
}
