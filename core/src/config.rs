//! YAML configuration document.
//!
//! Lives at `$HOME/.nethawk/config.yaml` (the invoking user's home, even
//! under sudo). The first run publishes a packaged template; `--publish`
//! re-merges the template into the user's file without clobbering user
//! values. Lookups use dotted paths (`http.dictionary`) so modules can
//! declare a `config_key` and stay ignorant of the document layout.

use std::path::{Path, PathBuf};

use serde_yaml::Value;

/// Packaged configuration template, published on first run.
pub const TEMPLATE: &str = include_str!("../resources/config.yaml");

const DEFAULT_CONFIG_NAME: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config file must contain a YAML mapping at the root: {0}")]
    NotAMapping(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    root: Value,
    path: PathBuf,
}

impl Config {
    /// Loads the default config, publishing the packaged template first if
    /// the file does not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();

        if !path.exists() {
            publish_template(&path)?;
            tracing::info!("Published default config to {}", path.display());
        }

        Self::from_file(&path)
    }

    /// Loads a custom config file; missing files are an error here.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_owned()));
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let root = parse_document(&raw, path)?;

        Ok(Self {
            root,
            path: path.to_owned(),
        })
    }

    pub fn from_str_for_tests(raw: &str) -> Self {
        Self {
            root: serde_yaml::from_str(raw).unwrap_or(Value::Null),
            path: PathBuf::from("<inline>"),
        }
    }

    /// `$HOME/.nethawk/config.yaml`, resolving the invoking user's home even
    /// when running under sudo.
    pub fn default_path() -> PathBuf {
        user_home().join(".nethawk").join(DEFAULT_CONFIG_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Navigates a dotted path through the document.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        let mut current = &self.root;

        for key in dotted.split('.') {
            current = current.as_mapping()?.get(key)?;
        }

        Some(current)
    }

    /// Returns the (possibly absent) section at `dotted` with typed getters.
    pub fn section(&self, dotted: &str) -> Section {
        Section(self.get(dotted).cloned().unwrap_or(Value::Null))
    }

    /// Merges the packaged template into this config, user values winning,
    /// and rewrites the file.
    pub fn republish(&mut self) -> Result<(), ConfigError> {
        let template: Value =
            serde_yaml::from_str(TEMPLATE).map_err(|source| ConfigError::Yaml {
                path: PathBuf::from("<template>"),
                source,
            })?;

        self.root = deep_merge(template, self.root.clone());
        self.save()
    }

    /// Sets a dotted key and persists the document.
    pub fn update(&mut self, dotted: &str, value: Value) -> Result<(), ConfigError> {
        let keys: Vec<&str> = dotted.split('.').collect();
        set_path(&mut self.root, &keys, value);
        self.save()
    }

    fn save(&self) -> Result<(), ConfigError> {
        let rendered = serde_yaml::to_string(&self.root).map_err(|source| ConfigError::Yaml {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, rendered).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn parse_document(raw: &str, path: &Path) -> Result<Value, ConfigError> {
    let expanded = expand_env(raw);
    let root: Value = serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Yaml {
        path: path.to_owned(),
        source,
    })?;

    if !matches!(root, Value::Mapping(_)) {
        return Err(ConfigError::NotAMapping(path.to_owned()));
    }

    Ok(root)
}

fn publish_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_owned(),
            source,
        })?;
    }

    std::fs::write(path, TEMPLATE).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })
}

/// The invoking user's home directory, resolving `SUDO_USER` first so that
/// `sudo nethawk` reads the operator's config rather than root's.
fn user_home() -> PathBuf {
    let user = std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .ok();

    match user.as_deref() {
        Some("root") => PathBuf::from("/root"),
        Some(name) if std::env::var("SUDO_USER").is_ok() => {
            PathBuf::from("/home").join(name)
        }
        _ => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
    }
}

/// Expands `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to an empty string.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }

        if braced {
            if matches!(chars.peek(), Some((_, '}'))) {
                chars.next();
            } else {
                // Unterminated `${`, emit verbatim.
                out.push('$');
                out.push('{');
                out.push_str(&name);
                continue;
            }
        }

        if name.is_empty() {
            out.push('$');
            if braced {
                out.push('{');
                out.push('}');
            }
            continue;
        }

        out.push_str(&std::env::var(&name).unwrap_or_default());
    }

    out
}

/// Writes `value` at the key path, materializing intermediate mappings.
fn set_path(node: &mut Value, keys: &[&str], value: Value) {
    let Some((head, rest)) = keys.split_first() else {
        *node = value;
        return;
    };

    if !matches!(node, Value::Mapping(_)) {
        *node = Value::Mapping(Default::default());
    }

    if let Value::Mapping(mapping) = node {
        let child = mapping.entry(Value::from(*head)).or_insert(Value::Null);
        set_path(child, rest, value);
    }
}

/// Recursively merges `override_` on top of `source`.
fn deep_merge(source: Value, override_: Value) -> Value {
    match (source, override_) {
        (Value::Mapping(mut base), Value::Mapping(over)) => {
            for (key, value) in over {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, over) => over,
    }
}

/// A (possibly null) configuration subtree with typed accessors.
#[derive(Debug, Clone)]
pub struct Section(Value);

impl Section {
    pub fn is_null(&self) -> bool {
        matches!(self.0, Value::Null)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_mapping()?.get(key)
    }

    pub fn subsection(&self, key: &str) -> Section {
        Section(self.get(key).cloned().unwrap_or(Value::Null))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)?.as_str().map(str::to_owned)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key)?.as_u64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        let items = self.get(key)?.as_sequence()?;
        Some(
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        )
    }

    pub fn get_u16_list(&self, key: &str) -> Option<Vec<u16>> {
        let items = self.get(key)?.as_sequence()?;
        Some(
            items
                .iter()
                .filter_map(|v| v.as_u64().and_then(|n| u16::try_from(n).ok()))
                .collect(),
        )
    }

    /// Scalar or list rendered as a comma-separated string, the shape module
    /// option defaults are declared in.
    pub fn get_csv_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Sequence(items) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_lookup() {
        let config = Config::from_str_for_tests(
            r#"
http:
  dictionary:
    threads: 40
    wordlist: "/tmp/words.txt"
"#,
        );

        assert_eq!(
            config.get("http.dictionary.threads").and_then(Value::as_u64),
            Some(40)
        );
        assert!(config.get("http.vhost").is_none());
        assert!(config.get("nope.nope").is_none());
    }

    #[test]
    fn section_typed_getters() {
        let config = Config::from_str_for_tests(
            r#"
http:
  dictionary:
    threads: 40
    timeout: 5
    recursion: true
    extensions: [php, html]
    match_code: [200, 301]
"#,
        );

        let section = config.section("http.dictionary");
        assert_eq!(section.get_u64("threads"), Some(40));
        assert_eq!(section.get_bool("recursion"), Some(true));
        assert_eq!(
            section.get_str_list("extensions"),
            Some(vec!["php".to_owned(), "html".to_owned()])
        );
        assert_eq!(section.get_u16_list("match_code"), Some(vec![200, 301]));
        assert_eq!(section.get_csv_string("match_code").as_deref(), Some("200,301"));

        let missing = config.section("smb");
        assert!(missing.is_null());
        assert_eq!(missing.get_str("anything"), None);
    }

    #[test]
    fn deep_merge_prefers_user_values() {
        let template: Value = serde_yaml::from_str(
            r#"
mongodb:
  port: 27017
  database: nethawk
nmap:
  min_rate: 1000
"#,
        )
        .unwrap();
        let user: Value = serde_yaml::from_str(
            r#"
mongodb:
  port: 27018
extra: kept
"#,
        )
        .unwrap();

        let merged = deep_merge(template, user);

        let config = Config {
            root: merged,
            path: PathBuf::from("<test>"),
        };
        assert_eq!(config.get("mongodb.port").and_then(Value::as_u64), Some(27018));
        assert_eq!(
            config.get("mongodb.database").and_then(Value::as_str),
            Some("nethawk")
        );
        assert_eq!(config.get("nmap.min_rate").and_then(Value::as_u64), Some(1000));
        assert_eq!(config.get("extra").and_then(Value::as_str), Some("kept"));
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("NETHAWK_TEST_TOKEN", "sekrit");

        let expanded = expand_env("key: \"${NETHAWK_TEST_TOKEN}\"\nother: $NETHAWK_TEST_TOKEN\n");

        assert_eq!(expanded, "key: \"sekrit\"\nother: sekrit\n");

        let untouched = expand_env("cost: $5 and ${unterminated");
        assert_eq!(untouched, "cost: $5 and ${unterminated");
    }

    #[test]
    fn template_parses_and_has_expected_sections() {
        let config = Config::from_str_for_tests(TEMPLATE);

        assert!(config.get("mongodb.host").is_some());
        assert!(config.get("nmap.profiles.initial").is_some());
        assert!(config.get("http.dictionary.wordlist").is_some());
        assert!(config.get("http.vhost.wordlist").is_some());
        assert!(config.get("http.listeners").is_some());
        assert!(config.get("http.cve.provider").is_some());
    }

    #[test]
    fn update_creates_intermediate_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "mongodb:\n  port: 27017\n").unwrap();

        let mut config = Config::from_file(&path).unwrap();
        config.update("mongodb.port", Value::from(27020)).unwrap();
        config.update("new.nested.key", Value::from("v")).unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.get("mongodb.port").and_then(Value::as_u64), Some(27020));
        assert_eq!(reloaded.get("new.nested.key").and_then(Value::as_str), Some("v"));
    }
}
