//! Module argument filtering.
//!
//! Modules coexist with the global argument set on one command line, so a
//! module only ever sees the flags it declared. Starting from `argv[1..]`,
//! the globally-parsed flags are subtracted, declared flags that the global
//! pass swallowed are recombined, glued short options (`-t80`) are split,
//! and the remainder is filtered down to declared flags with their values.

use std::collections::{BTreeMap, BTreeSet};

use super::ModuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Flag,
    Value,
}

/// Declarative parameter schema entry.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub long: &'static str,
    pub short: Option<char>,
    pub kind: ValueKind,
    pub default: Option<String>,
    pub help: &'static str,
}

impl OptionSpec {
    pub fn value(long: &'static str, help: &'static str) -> Self {
        Self {
            long,
            short: None,
            kind: ValueKind::Value,
            default: None,
            help,
        }
    }

    pub fn flag(long: &'static str, help: &'static str) -> Self {
        Self {
            long,
            short: None,
            kind: ValueKind::Flag,
            default: None,
            help,
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn default_opt(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    /// Sets a fallback default without clobbering one already present.
    pub fn default_or(mut self, default: impl Into<String>) -> Self {
        if self.default.is_none() {
            self.default = Some(default.into());
        }
        self
    }

    fn long_token(&self) -> String {
        format!("--{}", self.long)
    }

    fn short_token(&self) -> Option<String> {
        self.short.map(|c| format!("-{c}"))
    }

    fn matches_token(&self, token: &str) -> bool {
        token == self.long_token() || self.short_token().as_deref() == Some(token)
    }
}

/// Parsed module arguments: a value map plus a set of enabled flags.
#[derive(Debug, Default, Clone)]
pub struct ModuleArgs {
    values: BTreeMap<String, String>,
    flags: BTreeSet<String>,
}

impl ModuleArgs {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.flags.contains(key)
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ModuleError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };

        raw.parse()
            .map(Some)
            .map_err(|e: T::Err| ModuleError::InvalidArgument {
                flag: key.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Parses a comma-separated value; a missing key yields an empty list.
    pub fn get_csv<T>(&self, key: &str) -> Result<Vec<T>, ModuleError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return Ok(Vec::new());
        };

        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|e: T::Err| ModuleError::InvalidArgument {
                    flag: key.to_owned(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn insert_value(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }
}

struct GlobalFlag {
    long: &'static str,
    short: Option<&'static str>,
    takes_value: bool,
}

/// The flags the global CLI parser owns; mirrors the `clap` definition in
/// the binary crate.
const GLOBAL_FLAGS: &[GlobalFlag] = &[
    GlobalFlag { long: "--ports", short: Some("-p"), takes_value: true },
    GlobalFlag { long: "--module", short: Some("-M"), takes_value: true },
    GlobalFlag { long: "--config", short: Some("-c"), takes_value: true },
    GlobalFlag { long: "--publish", short: None, takes_value: false },
    GlobalFlag { long: "--nmap", short: None, takes_value: false },
    GlobalFlag { long: "--verbose", short: Some("-v"), takes_value: false },
    GlobalFlag { long: "--debug", short: None, takes_value: false },
    GlobalFlag { long: "--list-modules", short: None, takes_value: false },
    GlobalFlag { long: "--show-module", short: None, takes_value: true },
    GlobalFlag { long: "--help", short: Some("-h"), takes_value: false },
];

fn match_global(token: &str) -> Option<&'static GlobalFlag> {
    GLOBAL_FLAGS.iter().find(|f| {
        token == f.long
            || f.short == Some(token)
            || (f.takes_value && token.starts_with(&format!("{}=", f.long)))
    })
}

fn match_spec<'s>(specs: &'s [OptionSpec], token: &str) -> Option<&'s OptionSpec> {
    specs.iter().find(|s| s.matches_token(token))
}

/// A token consumed by the global parse, together with the value token it
/// swallowed (if any).
struct Consumed<'a> {
    flag: &'a str,
    value: Option<&'a str>,
}

/// Splits `argv[1..]` into globally-consumed tokens and the unknown remainder.
///
/// The first two bare tokens are the `[service] [target]` positionals.
fn split_global(full: &[String]) -> (Vec<Consumed<'_>>, Vec<&str>) {
    let mut consumed = Vec::new();
    let mut unknown = Vec::new();
    let mut positionals = 0usize;

    let mut iter = full.iter().enumerate().peekable();
    while let Some((_, token)) = iter.next() {
        if let Some(flag) = match_global(token) {
            let mut value = None;
            if flag.takes_value && !token.contains('=') {
                if let Some(&(_, next)) = iter.peek() {
                    if !next.starts_with('-') {
                        value = Some(next.as_str());
                        iter.next();
                    }
                }
            }
            consumed.push(Consumed { flag: token, value });
        } else if !token.starts_with('-') && positionals < 2 {
            positionals += 1;
        } else {
            unknown.push(token.as_str());
        }
    }

    (consumed, unknown)
}

/// Splits a full argument vector (program name included) into the tokens the
/// global parser owns and the unknown remainder destined for modules.
///
/// The binary feeds the first list to its `clap` definition, which keeps the
/// two views of the global surface in lockstep.
pub fn split_global_args(argv: &[String]) -> (Vec<String>, Vec<String>) {
    let mut known: Vec<String> = argv.iter().take(1).cloned().collect();
    let full = argv.get(1..).unwrap_or_default();

    let (consumed, unknown) = split_global(full);

    let mut positionals = 0usize;
    for token in full {
        let is_unknown = unknown.contains(&token.as_str());
        let is_consumed = consumed
            .iter()
            .any(|c| c.flag == token || c.value == Some(token.as_str()));

        if is_consumed {
            known.push(token.clone());
        } else if !is_unknown && !token.starts_with('-') && positionals < 2 {
            positionals += 1;
            known.push(token.clone());
        }
    }

    (known, unknown.into_iter().map(str::to_owned).collect())
}

/// Reduces the raw argument vector to the tokens meant for this module.
pub fn extract_module_args(argv: &[String], specs: &[OptionSpec]) -> Vec<String> {
    let full = argv.get(1..).unwrap_or_default();
    let (consumed, unknown) = split_global(full);

    // Recombine: flags the global pass swallowed that the module also
    // declares come back, together with their swallowed values.
    let mut combined: Vec<String> = unknown.iter().map(|s| (*s).to_owned()).collect();
    for c in &consumed {
        if match_spec(specs, c.flag).is_some() && !unknown.contains(&c.flag) {
            combined.push(c.flag.to_owned());
            if let Some(value) = c.value {
                combined.push(value.to_owned());
            }
        }
    }

    // Short-option glue: -t80 becomes -t 80 when -t is declared.
    let mut expanded = Vec::with_capacity(combined.len());
    for token in combined {
        if token.len() > 2 && token.starts_with('-') && !token.starts_with("--") {
            let (flag, rest) = token.split_at(2);
            if match_spec(specs, flag).is_some() {
                expanded.push(flag.to_owned());
                expanded.push(rest.to_owned());
                continue;
            }
        }
        expanded.push(token);
    }

    // Keep only declared flags (with their values) and declared `--key=`.
    let mut filtered = Vec::new();
    let mut skip = false;
    for (i, token) in expanded.iter().enumerate() {
        if skip {
            skip = false;
            continue;
        }

        if match_spec(specs, token).is_some() {
            filtered.push(token.clone());
            if let Some(next) = expanded.get(i + 1) {
                if !next.starts_with('-') {
                    filtered.push(next.clone());
                    skip = true;
                }
            }
        } else if specs
            .iter()
            .any(|s| token.starts_with(&format!("{}=", s.long_token())))
        {
            filtered.push(token.clone());
        }
    }

    filtered
}

/// Filters `argv` down to declared module flags and parses them, applying
/// spec defaults for anything left unset.
pub fn parse_module_args(argv: &[String], specs: &[OptionSpec]) -> Result<ModuleArgs, ModuleError> {
    let filtered = extract_module_args(argv, specs);
    let mut args = ModuleArgs::default();

    let mut iter = filtered.iter().peekable();
    while let Some(token) = iter.next() {
        if let Some(spec) = match_spec(specs, token) {
            match spec.kind {
                ValueKind::Flag => {
                    args.flags.insert(spec.long.to_owned());
                }
                ValueKind::Value => match iter.peek() {
                    Some(next) if !next.starts_with('-') => {
                        args.values.insert(spec.long.to_owned(), (*next).clone());
                        iter.next();
                    }
                    _ => return Err(ModuleError::MissingValue(spec.long.to_owned())),
                },
            }
            continue;
        }

        if let Some((key, value)) = token.strip_prefix("--").and_then(|t| t.split_once('=')) {
            if let Some(spec) = specs.iter().find(|s| s.long == key) {
                match spec.kind {
                    ValueKind::Flag => {
                        args.flags.insert(spec.long.to_owned());
                    }
                    ValueKind::Value => {
                        args.values.insert(spec.long.to_owned(), value.to_owned());
                    }
                }
            }
        }
    }

    for spec in specs {
        match spec.kind {
            ValueKind::Value => {
                if !args.values.contains_key(spec.long) {
                    if let Some(default) = &spec.default {
                        args.values.insert(spec.long.to_owned(), default.clone());
                    }
                }
            }
            ValueKind::Flag => {
                if !args.flags.contains(spec.long) && spec.default.as_deref() == Some("true") {
                    args.flags.insert(spec.long.to_owned());
                }
            }
        }
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| (*s).to_owned()).collect()
    }

    fn dir_specs() -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("wordlist", "wordlist path"),
            OptionSpec::value("threads", "worker count").default("40"),
            OptionSpec::flag("recursion", "recurse into directories"),
            OptionSpec::value("match-code", "status codes").default("200,301"),
        ]
    }

    #[test]
    fn filters_to_declared_flags() {
        let argv = argv(&[
            "nethawk", "http", "10.0.0.1", "-p", "80", "--wordlist", "/tmp/w", "--recursion",
            "--unrelated", "x",
        ]);

        let args = parse_module_args(&argv, &dir_specs()).unwrap();

        assert_eq!(args.get("wordlist"), Some("/tmp/w"));
        assert!(args.flag("recursion"));
        // Untouched values fall back to their defaults.
        assert_eq!(args.get("threads"), Some("40"));
        assert_eq!(args.get("match-code"), Some("200,301"));
    }

    #[test]
    fn globally_consumed_flags_are_recombined_when_declared() {
        let specs = vec![OptionSpec::value("port", "port to scan").short('p')];
        let argv = argv(&["nethawk", "10.0.0.1", "-p", "8080"]);

        let args = parse_module_args(&argv, &specs).unwrap();

        assert_eq!(args.get("port"), Some("8080"));
    }

    #[test]
    fn globally_consumed_flags_stay_hidden_otherwise() {
        let argv = argv(&["nethawk", "http", "10.0.0.1", "-M", "dir", "-p", "80"]);

        let filtered = extract_module_args(&argv, &dir_specs());

        assert!(filtered.is_empty(), "unexpected tokens: {filtered:?}");
    }

    #[test]
    fn glued_short_options_are_split() {
        let specs = vec![OptionSpec::value("threads", "worker count").short('t')];
        let argv = argv(&["nethawk", "http", "10.0.0.1", "-t80"]);

        let args = parse_module_args(&argv, &specs).unwrap();

        assert_eq!(args.get("threads"), Some("80"));
    }

    #[test]
    fn key_equals_value_form() {
        let argv = argv(&["nethawk", "http", "10.0.0.1", "--threads=64"]);

        let args = parse_module_args(&argv, &dir_specs()).unwrap();

        assert_eq!(args.get("threads"), Some("64"));
    }

    #[test]
    fn value_looking_like_a_flag_is_not_attached() {
        let argv = argv(&["nethawk", "http", "10.0.0.1", "--wordlist", "--recursion"]);

        let result = parse_module_args(&argv, &dir_specs());

        assert!(matches!(result, Err(ModuleError::MissingValue(k)) if k == "wordlist"));
    }

    #[test]
    fn csv_and_typed_getters() {
        let mut args = ModuleArgs::default();
        args.insert_value("match-code", "200, 301,302");
        args.insert_value("threads", "40");
        args.insert_value("broken", "abc");

        assert_eq!(args.get_csv::<u16>("match-code").unwrap(), vec![200, 301, 302]);
        assert_eq!(args.get_parsed::<usize>("threads").unwrap(), Some(40));
        assert_eq!(args.get_parsed::<usize>("missing").unwrap(), None);
        assert!(args.get_parsed::<usize>("broken").is_err());
    }
}
