//! HTTP path enumeration.

use async_trait::async_trait;
use reqwest::Client;

use crate::engine::{FuzzMode, ResponseMeta};
use crate::{is_probably_directory, random_string, FuzzConfig, FuzzError};

pub struct DirectoryMode {
    config: FuzzConfig,
}

impl DirectoryMode {
    pub fn new(config: FuzzConfig) -> Self {
        Self { config }
    }

    /// Extension variants of `entry`, each suffix carrying exactly one dot.
    fn with_extensions(&self, entry: &str) -> Vec<String> {
        self.config
            .extensions
            .iter()
            .map(|ext| format!(".{}", ext.trim_start_matches('.')))
            .filter(|ext| !entry.ends_with(ext.as_str()))
            .map(|ext| format!("{entry}{ext}"))
            .collect()
    }

    fn read_wordlist(&self) -> Result<Vec<String>, FuzzError> {
        let path = &self.config.wordlist;

        if !path.exists() {
            return Err(FuzzError::WordlistNotFound(path.clone()));
        }
        if !path.is_file() {
            return Err(FuzzError::WordlistNotAFile(path.clone()));
        }

        let raw = std::fs::read_to_string(path).map_err(|source| FuzzError::WordlistIo {
            path: path.clone(),
            source,
        })?;

        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect())
    }
}

#[async_trait]
impl FuzzMode for DirectoryMode {
    fn entries(&self, base: &str) -> Result<Vec<String>, FuzzError> {
        let words = self.read_wordlist()?;
        let base = base.trim_end_matches('/');

        let mut entries = Vec::with_capacity((words.len() + 1) * (1 + self.config.extensions.len()));

        let calibration = random_string(10);
        let full = format!("{base}/{calibration}");
        entries.extend(self.with_extensions(&full));
        entries.insert(0, full);

        for word in words {
            let full = format!("{base}/{}", word.trim_start_matches('/'));
            entries.push(full.clone());
            entries.extend(self.with_extensions(&full));
        }

        Ok(entries)
    }

    async fn fetch(&self, client: &Client, entry: &str) -> Result<reqwest::Response, reqwest::Error> {
        client.get(entry).send().await
    }

    async fn recurse_base(
        &self,
        entry: &str,
        meta: &ResponseMeta,
        body: &str,
    ) -> Result<Option<String>, FuzzError> {
        if is_probably_directory(&meta.path, meta.status, &meta.location, body) {
            Ok(Some(entry.to_owned()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_wordlist(lines: &str, extensions: &[&str]) -> (FuzzConfig, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();

        let config = FuzzConfig {
            wordlist: file.path().to_owned(),
            extensions: extensions.iter().map(|s| (*s).to_owned()).collect(),
            ..FuzzConfig::default()
        };
        (config, file)
    }

    #[test]
    fn entries_start_with_calibration_and_apply_extensions() {
        let (config, _file) = config_with_wordlist("admin\n# comment\n\nbackup.php\n", &["php"]);
        let mode = DirectoryMode::new(config);

        let entries = mode.entries("http://example.com/").unwrap();

        // calibration, calibration.php, admin, admin.php, backup.php
        assert_eq!(entries.len(), 5);
        assert!(entries[0].starts_with("http://example.com/"));
        assert!(entries[1].ends_with(".php"));
        assert!(entries.contains(&"http://example.com/admin".to_owned()));
        assert!(entries.contains(&"http://example.com/admin.php".to_owned()));
        // Already carries the suffix; no doubled extension.
        assert!(entries.contains(&"http://example.com/backup.php".to_owned()));
        assert!(!entries.contains(&"http://example.com/backup.php.php".to_owned()));
    }

    #[test]
    fn extension_dots_are_normalized() {
        let (config, _file) = config_with_wordlist("admin\n", &[".php", "html"]);
        let mode = DirectoryMode::new(config);

        let entries = mode.entries("http://example.com").unwrap();

        assert!(entries.contains(&"http://example.com/admin.php".to_owned()));
        assert!(entries.contains(&"http://example.com/admin.html".to_owned()));
    }

    #[test]
    fn missing_wordlist_is_an_error() {
        let config = FuzzConfig {
            wordlist: "/definitely/not/here.txt".into(),
            ..FuzzConfig::default()
        };
        let mode = DirectoryMode::new(config);

        assert!(matches!(
            mode.entries("http://example.com"),
            Err(FuzzError::WordlistNotFound(_))
        ));
    }
}
