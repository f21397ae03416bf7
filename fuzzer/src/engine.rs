//! The shared worker-pool engine.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::Rng;
use reqwest::Client;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{FuzzConfig, FuzzError, FuzzResult};

/// Length of the sliding window used for the request-rate estimate.
const RATE_WINDOW: usize = 10;

/// Normalized response metadata, computed once per fetched response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub path: String,
    pub status: u16,
    pub size: usize,
    pub location: String,
    pub words: usize,
    pub lines: usize,
    pub hash: [u8; 16],
}

/// A fuzzing mode: generates candidate entries for a base, fetches one
/// entry, and decides whether a hit opens a new recursion round.
#[async_trait]
pub trait FuzzMode: Send + Sync + 'static {
    /// Candidate entries for `base`, calibration entry first.
    fn entries(&self, base: &str) -> Result<Vec<String>, FuzzError>;

    async fn fetch(&self, client: &Client, entry: &str) -> Result<reqwest::Response, reqwest::Error>;

    /// Called for every valid hit when recursion is allowed; returns the
    /// base of the next round, performing any mode side effects first.
    async fn recurse_base(
        &self,
        entry: &str,
        meta: &ResponseMeta,
        body: &str,
    ) -> Result<Option<String>, FuzzError>;
}

struct Task {
    entry: String,
    depth: usize,
}

pub(crate) struct Engine<M: FuzzMode> {
    mode: M,
    config: FuzzConfig,
    tx: flume::Sender<Task>,
    rx: flume::Receiver<Task>,
    pending: AtomicUsize,
    drained: Notify,
    semaphore: Semaphore,
    visited: Mutex<HashSet<String>>,
    baseline: Mutex<Option<[u8; 16]>>,
    results: Mutex<BTreeSet<FuzzResult>>,
    /// Hits not yet shown by the live renderer.
    fresh_hits: Mutex<Vec<FuzzResult>>,
    completed: AtomicUsize,
    errors: AtomicUsize,
    total: AtomicUsize,
    window: Mutex<VecDeque<Instant>>,
    started: Instant,
}

/// A point-in-time view of engine counters for rendering.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub completed: usize,
    pub errors: usize,
    pub total: usize,
    pub requests_per_second: f64,
    pub elapsed: Duration,
}

impl<M: FuzzMode> Engine<M> {
    pub(crate) fn new(config: FuzzConfig, mode: M) -> Self {
        let (tx, rx) = flume::unbounded();
        let threads = config.threads.max(1);

        Self {
            mode,
            config,
            tx,
            rx,
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            semaphore: Semaphore::new(threads),
            visited: Mutex::new(HashSet::new()),
            baseline: Mutex::new(None),
            results: Mutex::new(BTreeSet::new()),
            fresh_hits: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            window: Mutex::new(VecDeque::with_capacity(RATE_WINDOW)),
            started: Instant::now(),
        }
    }

    pub(crate) async fn run(self: Arc<Self>, base: &str) -> Result<Vec<FuzzResult>, FuzzError> {
        let client = Client::builder()
            .timeout(self.config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(self.config.threads.max(1))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(FuzzError::Client)?;

        let token = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.config.threads.max(1));
        for _ in 0..self.config.threads.max(1) {
            let engine = Arc::clone(&self);
            let client = client.clone();
            let token = token.clone();
            workers.push(tokio::spawn(async move {
                engine.worker(client, token).await;
            }));
        }

        if let Err(e) = self.enqueue_round(base, 0) {
            token.cancel();
            for worker in workers {
                let _ = worker.await;
            }
            return Err(e);
        }
        self.join().await;

        token.cancel();
        for worker in workers {
            let _ = worker.await;
        }

        let results = lock(&self.results);
        Ok(results.iter().cloned().collect())
    }

    /// Generates the entry list for `base` and queues every entry at `depth`.
    fn enqueue_round(&self, base: &str, depth: usize) -> Result<(), FuzzError> {
        let entries = self.mode.entries(base)?;
        tracing::debug!(base, depth, count = entries.len(), "Queueing fuzz round");

        self.total.fetch_add(entries.len(), Ordering::SeqCst);
        for entry in entries {
            self.pending.fetch_add(1, Ordering::SeqCst);
            // The receiver lives as long as the engine, so this cannot fail.
            let _ = self.tx.send(Task { entry, depth });
        }

        Ok(())
    }

    /// Waits until every queued task has been fully processed.
    async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn worker(&self, client: Client, token: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = token.cancelled() => break,
                task = self.rx.recv_async() => match task {
                    Ok(task) => task,
                    Err(_) => break,
                },
            };

            self.process(&client, &task).await;

            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.drained.notify_waiters();
            }
        }
    }

    async fn process(&self, client: &Client, task: &Task) {
        {
            let mut visited = lock(&self.visited);
            if !visited.insert(task.entry.clone()) {
                return;
            }
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        for attempt in 0..self.config.max_tries.max(1) {
            match self.mode.fetch(client, &task.entry).await {
                Ok(response) => {
                    self.evaluate(response, task).await;
                    break;
                }
                Err(e) => {
                    tracing::debug!(entry = %task.entry, attempt, "request failed: {e}");
                    self.errors.fetch_add(1, Ordering::SeqCst);

                    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.1);
                    let backoff = 0.2 * attempt as f64 + jitter;
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        let mut window = lock(&self.window);
        if window.len() == RATE_WINDOW {
            window.pop_front();
        }
        window.push_back(Instant::now());
    }

    async fn evaluate(&self, response: reqwest::Response, task: &Task) {
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        let Ok(body) = response.bytes().await else {
            self.errors.fetch_add(1, Ordering::SeqCst);
            return;
        };
        let text = String::from_utf8_lossy(&body);

        let meta = ResponseMeta {
            path: extract_path(&task.entry),
            status,
            size: body.len(),
            location,
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
            hash: Md5::digest(&body).into(),
        };

        {
            let mut baseline = lock(&self.baseline);
            match *baseline {
                // The calibration response is the first one evaluated and
                // only establishes the wildcard baseline.
                None => {
                    *baseline = Some(meta.hash);
                    return;
                }
                Some(hash) if hash == meta.hash => return,
                Some(_) => {}
            }
        }

        if !self.config.match_codes.contains(&meta.status) {
            return;
        }

        let result = FuzzResult {
            path: meta.path.clone(),
            status: meta.status,
            size: meta.size,
            words: meta.words,
            lines: meta.lines,
        };

        let newly_inserted = lock(&self.results).insert(result.clone());
        if newly_inserted {
            lock(&self.fresh_hits).push(result);
        }

        if self.config.recursion && task.depth + 1 < self.config.max_depth {
            match self.mode.recurse_base(&task.entry, &meta, &text).await {
                Ok(Some(next_base)) => {
                    if let Err(e) = self.enqueue_round(&next_base, task.depth + 1) {
                        tracing::error!("Failed to queue recursion into {next_base}: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Recursion hook failed for {}: {e}", task.entry),
            }
        }
    }

    pub(crate) fn stats(&self) -> EngineStats {
        let window = lock(&self.window);
        let requests_per_second = match (window.front(), window.len()) {
            (Some(first), len) if len >= 2 => {
                let span = first.elapsed().as_secs_f64();
                if span > 0.0 {
                    len as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        EngineStats {
            completed: self.completed.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            requests_per_second,
            elapsed: self.started.elapsed(),
        }
    }

    /// Hits discovered since the last call; consumed by the live renderer.
    pub(crate) fn take_fresh_hits(&self) -> Vec<FuzzResult> {
        std::mem::take(&mut *lock(&self.fresh_hits))
    }
}

/// `Mutex::lock` that survives poisoning; worker panics must not wedge the
/// render loop.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The path component of a URL entry, or the entry itself for bare
/// hostnames (vhost mode).
fn extract_path(entry: &str) -> String {
    if entry.contains("://") {
        if let Ok(url) = url::Url::parse(entry) {
            return url.path().to_owned();
        }
    }

    entry.to_owned()
}
