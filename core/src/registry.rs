//! Process-wide registries for service handlers and enumeration modules.
//!
//! Both registries are populated once at boot by the component crates'
//! registration routines and are read-only afterwards; callers share them
//! through an `Arc`. Duplicate registrations are tolerated deliberately:
//! the last registration wins, which keeps registration idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::module::{Module, ModuleInfo, ServiceHandler};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no registered service handler found for service: '{0}'")]
    ServiceNotFound(String),
    #[error("no registered module found for: '{0}'")]
    ModuleNotFound(String),
}

#[derive(Default)]
pub struct Registry {
    /// Handlers keyed by canonical service name.
    services: BTreeMap<&'static str, Arc<dyn ServiceHandler>>,
    /// Modules keyed by their fully-qualified path.
    modules: BTreeMap<&'static str, Arc<dyn Module>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(&mut self, handler: Arc<dyn ServiceHandler>) {
        self.services.insert(handler.name(), handler);
    }

    pub fn register_module(&mut self, module: Arc<dyn Module>) {
        let info = module.info();
        debug_assert!(!info.name.is_empty() && !info.path.is_empty());
        self.modules.insert(info.path, module);
    }

    /// Looks up a handler by canonical name or alias. Case-sensitive.
    pub fn find_service(&self, name: &str) -> Result<Arc<dyn ServiceHandler>, RegistryError> {
        if let Some(handler) = self.services.get(name) {
            return Ok(Arc::clone(handler));
        }

        self.services
            .values()
            .find(|h| h.aliases().contains(&name))
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_owned()))
    }

    pub fn get_service(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.find_service(name).ok()
    }

    /// Looks up a module by fully-qualified path, name or alias.
    pub fn find_module(&self, name: &str) -> Result<Arc<dyn Module>, RegistryError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Arc::clone(module));
        }

        self.modules
            .values()
            .find(|m| {
                let info = m.info();
                info.name == name || info.aliases.contains(&name)
            })
            .cloned()
            .ok_or_else(|| RegistryError::ModuleNotFound(name.to_owned()))
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.find_module(name).ok()
    }

    /// Sorted union of service names and aliases, each listed once.
    pub fn all_services(&self) -> Vec<String> {
        let mut names = BTreeSet::new();

        for handler in self.services.values() {
            names.insert(handler.name().to_owned());
            names.extend(handler.aliases().iter().map(|a| (*a).to_owned()));
        }

        names.into_iter().collect()
    }

    pub fn module_paths(&self) -> Vec<String> {
        self.modules.keys().map(|k| (*k).to_owned()).collect()
    }

    /// Metadata for every registered module, for human display.
    pub fn describe_modules(&self) -> Vec<ModuleInfo> {
        self.modules.values().map(|m| m.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleArgs, ModuleContext, ModuleError, ModuleGroup};
    use async_trait::async_trait;

    struct StubHandler {
        name: &'static str,
        aliases: &'static [&'static str],
        port: u16,
    }

    #[async_trait]
    impl ServiceHandler for StubHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn aliases(&self) -> &'static [&'static str] {
            self.aliases
        }

        fn group(&self) -> ModuleGroup {
            ModuleGroup::Protocols
        }

        fn default_port(&self) -> Option<u16> {
            Some(self.port)
        }
    }

    struct StubModule {
        info: ModuleInfo,
    }

    #[async_trait]
    impl Module for StubModule {
        fn info(&self) -> ModuleInfo {
            self.info.clone()
        }

        async fn run(
            &self,
            _ctx: &ModuleContext,
            _target: Option<&str>,
            _port: Option<u16>,
            _args: &ModuleArgs,
        ) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn module(path: &'static str, name: &'static str) -> Arc<dyn Module> {
        Arc::new(StubModule {
            info: ModuleInfo {
                path,
                name,
                group: ModuleGroup::Protocols,
                category: Some("http"),
                config_key: None,
                aliases: &["alias"],
                description: "",
            },
        })
    }

    #[test]
    fn aliases_resolve_to_the_same_handler() {
        let mut registry = Registry::new();
        registry.register_service(Arc::new(StubHandler {
            name: "http",
            aliases: &["https"],
            port: 80,
        }));

        let by_name = registry.find_service("http").unwrap();
        let by_alias = registry.find_service("https").unwrap();

        assert_eq!(by_name.name(), by_alias.name());
        assert!(registry.find_service("HTTP").is_err(), "lookups are case-sensitive");
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::new();
        registry.register_service(Arc::new(StubHandler {
            name: "http",
            aliases: &[],
            port: 80,
        }));
        registry.register_service(Arc::new(StubHandler {
            name: "http",
            aliases: &["https"],
            port: 8080,
        }));

        let handler = registry.find_service("http").unwrap();

        assert_eq!(handler.default_port(), Some(8080));
        assert_eq!(
            registry.all_services(),
            vec!["http".to_owned(), "https".to_owned()]
        );
    }

    #[test]
    fn module_lookup_by_path_name_and_alias() {
        let mut registry = Registry::new();
        registry.register_module(module("protocols/http/dir", "dir"));

        assert!(registry.find_module("protocols/http/dir").is_ok());
        assert!(registry.find_module("dir").is_ok());
        assert!(registry.find_module("alias").is_ok());
        assert!(matches!(
            registry.find_module("nope"),
            Err(RegistryError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn all_services_sorted_and_deduplicated() {
        let mut registry = Registry::new();
        registry.register_service(Arc::new(StubHandler {
            name: "smb",
            aliases: &[],
            port: 445,
        }));
        registry.register_service(Arc::new(StubHandler {
            name: "http",
            aliases: &["https"],
            port: 80,
        }));

        assert_eq!(
            registry.all_services(),
            vec!["http".to_owned(), "https".to_owned(), "smb".to_owned()]
        );
    }
}
