//! Rate-limited batch execution.
//!
//! Runs a worker over items in fixed-size groups. Items within a group run
//! concurrently; groups run one after another with a pause in between so
//! the provider's per-minute quota is respected.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

/// Outcome of a batched run: successes keyed by item, failures on the side.
#[derive(Debug)]
pub struct BatchReport<T, R, E> {
    pub results: HashMap<T, R>,
    pub failures: Vec<(T, E)>,
    pub batches: usize,
}

impl<T, R, E> BatchReport<T, R, E> {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Execute `worker` for every item, `batch_size` at a time.
///
/// A failing item never aborts its siblings; it is logged and returned in
/// `failures`. After each group the runner waits `inter_batch_delay`.
pub async fn run_batched<T, R, E, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    inter_batch_delay: Duration,
    worker: F,
) -> BatchReport<T, R, E>
where
    T: Clone + Eq + Hash + Display,
    E: Display,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let batch_size = batch_size.max(1);
    let mut report = BatchReport {
        results: HashMap::with_capacity(items.len()),
        failures: Vec::new(),
        batches: 0,
    };

    for chunk in items.chunks(batch_size) {
        let outcomes = join_all(chunk.iter().cloned().map(|item| {
            let call = worker(item.clone());
            async move { (item, call.await) }
        }))
        .await;

        for (item, outcome) in outcomes {
            match outcome {
                Ok(value) => {
                    report.results.insert(item, value);
                }
                Err(e) => {
                    warn!(item = %item, error = %e, "Batch item failed");
                    report.failures.push((item, e));
                }
            }
        }

        report.batches += 1;
        debug!(
            batch = report.batches,
            size = chunk.len(),
            delay_ms = inter_batch_delay.as_millis() as u64,
            "Batch complete, pausing"
        );
        tokio::time::sleep(inter_batch_delay).await;
    }

    report
}
