//! Built-in service handlers.

use nethawk_core::module::{ModuleGroup, ServiceHandler};

/// HTTP enumeration: listener list comes from the `http.listeners` config
/// key; `https` resolves to the same handler.
pub struct HttpHandler;

#[async_trait::async_trait]
impl ServiceHandler for HttpHandler {
    fn name(&self) -> &'static str {
        "http"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["https"]
    }

    fn group(&self) -> ModuleGroup {
        ModuleGroup::Protocols
    }

    fn default_port(&self) -> Option<u16> {
        Some(80)
    }

    fn description(&self) -> &'static str {
        "HTTP Enumeration"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nethawk_core::config::Config;

    #[test]
    fn listener_names_come_from_config() {
        let config = Config::from_str_for_tests("http:\n  listeners: [robots, dir]\n");

        assert_eq!(
            HttpHandler.listener_names(&config),
            vec!["robots".to_owned(), "dir".to_owned()]
        );
    }

    #[test]
    fn singular_listener_key_is_accepted() {
        let config = Config::from_str_for_tests("http:\n  listener: [dir]\n");

        assert_eq!(HttpHandler.listener_names(&config), vec!["dir".to_owned()]);
    }

    #[test]
    fn missing_config_means_no_listeners() {
        let config = Config::from_str_for_tests("smb: {}\n");

        assert!(HttpHandler.listener_names(&config).is_empty());
    }
}
