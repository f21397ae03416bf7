//! Global argument surface and validation.
//!
//! The command line is shared between this global set and whatever flags the
//! selected modules declare, so parsing happens in two phases: the argument
//! vector is first split into globally-owned tokens and a module remainder
//! (see `nethawk_core::module::split_global_args`), and only the former is
//! handed to `clap`. Modules later re-filter the full vector themselves.

use std::path::PathBuf;

use clap::Parser;
use nethawk_core::module::split_global_args;
use nethawk_core::registry::Registry;

/// Exit code for invalid flag combinations and missing arguments.
pub const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "nethawk",
    version,
    about = "Network reconnaissance orchestrator",
    after_help = "Module flags (e.g. --wordlist, --threads) are accepted alongside the global\nset and forwarded to the selected modules; `--show-module <name>` lists them."
)]
pub struct Options {
    /// Service to enumerate (e.g. http, https)
    pub service: Option<String>,

    /// Target IP or domain
    pub target: Option<String>,

    /// Comma-separated ports to scan
    #[arg(short = 'p', long)]
    pub ports: Option<String>,

    /// Comma-separated module names to run (requires a service)
    #[arg(short = 'M', long)]
    pub module: Option<String>,

    /// Custom config file path
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Merge the packaged config template into the user config and exit
    #[arg(long)]
    pub publish: bool,

    /// Run only the nmap module against the target
    #[arg(long)]
    pub nmap: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,

    /// List the modules available for the given service
    #[arg(long)]
    pub list_modules: bool,

    /// Show a module's options
    #[arg(long, value_name = "NAME")]
    pub show_module: Option<String>,
}

impl Options {
    /// Parses and validates the global surface of `argv`.
    ///
    /// A first positional that is not a registered service name is treated
    /// as the target.
    pub fn from_argv(argv: &[String], registry: &Registry) -> Self {
        if argv.len() == 1 {
            // No arguments at all: show usage and leave.
            let _ = Options::parse_from(["nethawk", "--help"]);
        }

        let (global, module_args) = split_global_args(argv);
        tracing::debug!(?module_args, "Tokens left for module parsers");

        let mut options = Options::parse_from(&global);

        if let Some(service) = options.service.clone() {
            if !registry.all_services().contains(&service) {
                options.target = Some(service);
                options.service = None;
            }
        }

        options.validate();
        options
    }

    fn validate(&self) {
        if self.service.is_none() && self.module.is_some() {
            usage_error("No Service specified but module are set.");
        }

        if self.service.is_some()
            && self.target.is_none()
            && self.module.is_none()
            && !self.list_modules
            && self.show_module.is_none()
        {
            usage_error(&format!(
                "need at least a target or [-M|--module|--list-modules|--show-module] flags when using '{}' service.",
                self.service.as_deref().unwrap_or_default().to_uppercase()
            ));
        }

        if self.list_modules && self.service.is_none() {
            usage_error("The [--list-modules] flag needs a <service> argument.");
        }
    }

    /// Parses `-p 80,8080` into a port list; anything that is not a plain
    /// comma-separated list (e.g. nmap range syntax) is left to the modules.
    pub fn port_list(&self) -> Option<Vec<u16>> {
        let raw = self.ports.as_deref()?;

        let parsed: Result<Vec<u16>, _> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect();

        parsed.ok().filter(|ports| !ports.is_empty())
    }

    /// Anything that warrants running the dispatcher.
    pub fn has_work(&self) -> bool {
        self.target.is_some()
            || self.ports.is_some()
            || self.service.is_some()
            || self.module.is_some()
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!(
        "{} {message}",
        console::style("Missing arguments:").red().bold()
    );
    eprintln!("Try 'nethawk --help' for usage.");
    std::process::exit(EXIT_USAGE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nethawk_core::module::{Module, ModuleArgs, ModuleContext, ModuleError, ModuleGroup, ModuleInfo, ServiceHandler};
    use std::sync::Arc;

    struct HttpStub;

    #[async_trait::async_trait]
    impl ServiceHandler for HttpStub {
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
    }

    struct NoopModule;

    #[async_trait::async_trait]
    impl Module for NoopModule {
        fn info(&self) -> ModuleInfo {
            ModuleInfo {
                path: "protocols/http/noop",
                name: "noop",
                group: ModuleGroup::Protocols,
                category: Some("http"),
                config_key: None,
                aliases: &[],
                description: "",
            }
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

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_service(Arc::new(HttpStub));
        registry.register_module(Arc::new(NoopModule));
        registry
    }

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn bare_target_shifts_out_of_the_service_slot() {
        let options = Options::from_argv(&argv(&["nethawk", "10.0.0.1"]), &registry());

        assert_eq!(options.service, None);
        assert_eq!(options.target.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn known_service_stays_put() {
        let options = Options::from_argv(&argv(&["nethawk", "http", "10.0.0.1"]), &registry());

        assert_eq!(options.service.as_deref(), Some("http"));
        assert_eq!(options.target.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn service_alias_is_recognized() {
        let options = Options::from_argv(&argv(&["nethawk", "https", "10.0.0.1"]), &registry());

        assert_eq!(options.service.as_deref(), Some("https"));
    }

    #[test]
    fn module_flags_do_not_disturb_global_parsing() {
        let options = Options::from_argv(
            &argv(&[
                "nethawk",
                "http",
                "10.0.0.1",
                "--wordlist",
                "/tmp/w.txt",
                "-p",
                "80,8080",
                "--recursion",
            ]),
            &registry(),
        );

        assert_eq!(options.service.as_deref(), Some("http"));
        assert_eq!(options.target.as_deref(), Some("10.0.0.1"));
        assert_eq!(options.port_list(), Some(vec![80, 8080]));
    }

    #[test]
    fn nmap_range_syntax_is_left_to_modules() {
        let options = Options::from_argv(
            &argv(&["nethawk", "10.0.0.1", "-p", "1-1000"]),
            &registry(),
        );

        assert_eq!(options.port_list(), None);
        assert_eq!(options.ports.as_deref(), Some("1-1000"));
    }
}
