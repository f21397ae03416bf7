//! Worker-pool HTTP fuzzing engine.
//!
//! Two modes share the engine: [`dir::DirectoryMode`] enumerates paths,
//! [`vhost::VhostMode`] enumerates `Host:` headers against a fixed target.
//! The engine owns a queue of `(entry, depth)` tasks drained by
//! `config.threads` workers; a semaphore of the same size bounds in-flight
//! requests. The first response (a random calibration entry enqueued ahead
//! of the wordlist) sets the wildcard baseline; every later response whose
//! body hash equals the baseline is discarded.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dir;
mod engine;
mod render;
pub mod vhost;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nethawk_core::hosts::HostsError;

pub use engine::{EngineStats, FuzzMode, ResponseMeta};

#[derive(Debug, thiserror::Error)]
pub enum FuzzError {
    #[error("wordlist not found: {0}")]
    WordlistNotFound(PathBuf),
    #[error("wordlist path is not a file: {0}")]
    WordlistNotAFile(PathBuf),
    #[error("failed to read wordlist {path}")]
    WordlistIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Hosts(#[from] HostsError),
}

/// Engine configuration; defaults mirror the shipped config template.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    pub threads: usize,
    pub wordlist: PathBuf,
    pub match_codes: Vec<u16>,
    /// Directory mode only: suffixes applied to each wordlist line.
    pub extensions: Vec<String>,
    pub recursion: bool,
    pub max_depth: usize,
    pub max_tries: usize,
    pub timeout: Duration,
    /// VHost mode only: extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            wordlist: PathBuf::new(),
            match_codes: vec![200, 301, 302, 307, 401],
            extensions: Vec::new(),
            recursion: false,
            max_depth: 3,
            max_tries: 3,
            timeout: nethawk_core::HTTP_TIMEOUT,
            headers: Vec::new(),
        }
    }
}

/// The unit of deduplication and persistence: `(path, status, size, words, lines)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuzzResult {
    pub path: String,
    pub status: u16,
    pub size: usize,
    pub words: usize,
    pub lines: usize,
}

/// Drives one fuzzing run with a live status line.
pub struct Fuzzer<M: FuzzMode> {
    engine: Arc<engine::Engine<M>>,
    quiet: bool,
}

impl<M: FuzzMode> Fuzzer<M> {
    pub fn new(config: FuzzConfig, mode: M) -> Self {
        Self {
            engine: Arc::new(engine::Engine::new(config, mode)),
            quiet: false,
        }
    }

    /// Disables the live status line; results are still collected.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Runs the engine to completion and returns the sorted valid results.
    pub async fn start(&self, base: &str) -> Result<Vec<FuzzResult>, FuzzError> {
        let render_token = CancellationToken::new();
        let render_task = if self.quiet {
            None
        } else {
            Some(tokio::spawn(render::live_status(
                Arc::clone(&self.engine),
                render_token.clone(),
            )))
        };

        let outcome = Arc::clone(&self.engine).run(base).await;

        render_token.cancel();
        if let Some(task) = render_task {
            let _ = task.await;
        }

        outcome
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }
}

pub(crate) fn random_string(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Heuristic directory detection: trailing slash, a redirect that gains one,
/// or an index listing body.
pub(crate) fn is_probably_directory(path: &str, status: u16, location: &str, body: &str) -> bool {
    if path.ends_with('/') {
        return true;
    }

    if matches!(status, 301 | 302) && location.ends_with('/') {
        return true;
    }

    body.contains("Index of")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_strings_are_alphanumeric() {
        let s = random_string(10);

        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_string(10), random_string(10));
    }

    #[test]
    fn directory_heuristics() {
        assert!(is_probably_directory("/admin/", 200, "", ""));
        assert!(is_probably_directory("/admin", 301, "/admin/", ""));
        assert!(is_probably_directory("/admin", 200, "", "<title>Index of /admin</title>"));
        assert!(!is_probably_directory("/admin", 200, "", "hello"));
        assert!(!is_probably_directory("/admin", 302, "/other", ""));
    }
}
