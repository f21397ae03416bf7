//! Live progress rendering for a fuzzing run.
//!
//! One status line updated at a capped rate, with each valid hit printed
//! above it as it lands. All engine state is read through atomic snapshots,
//! so rendering never races counter mutation.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, FuzzMode};
use crate::FuzzResult;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) async fn live_status<M: FuzzMode>(engine: Arc<Engine<M>>, token: CancellationToken) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    loop {
        for hit in engine.take_fresh_hits() {
            bar.println(format_hit(&hit));
        }
        bar.set_message(format_stats(&engine));

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
        }
    }

    // Flush anything that landed between the last tick and cancellation.
    for hit in engine.take_fresh_hits() {
        bar.println(format_hit(&hit));
    }
    bar.finish_with_message(format_stats(&engine));
}

fn format_stats<M: FuzzMode>(engine: &Engine<M>) -> String {
    let stats = engine.stats();
    let percentage = if stats.total > 0 {
        stats.completed as f64 / stats.total as f64 * 100.0
    } else {
        0.0
    };

    format!(
        "Requests: {}/{} ({percentage:.1}%) | Speed: {:.0} req/sec | Time: {:.1}s | Errors: {}",
        stats.completed,
        stats.total,
        stats.requests_per_second,
        stats.elapsed.as_secs_f64(),
        stats.errors,
    )
}

fn format_hit(hit: &FuzzResult) -> String {
    let path = match hit.status {
        200..=299 => style(hit.path.clone()).green().bold(),
        300..=399 => style(hit.path.clone()).blue().bold(),
        400..=499 => style(hit.path.clone()).magenta().bold(),
        500..=599 => style(hit.path.clone()).red().bold(),
        _ => style(hit.path.clone()).yellow().bold(),
    };

    format!(
        "{path:<40} [Status: {}, Size: {}, Words: {}, Lines: {}]",
        hit.status, hit.size, hit.words, hit.lines
    )
}
