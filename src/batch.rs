//! Bounded-concurrency batch driver.
//!
//! Each item runs in its own task, so a failing or panicking item never
//! takes its siblings down. At most `concurrency` items run at once. The
//! batch stops scheduling new items as soon as its cancellation token
//! fires, and in-flight items get a child token so they can stop promptly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use af_core::config::{BatchConfig, MAX_CONCURRENCY};
use af_core::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Result of handling one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    /// The item was not processed, e.g. because a precondition failed.
    Skipped(String),
    /// The item was processed and reported failure.
    Failed(String),
}

/// Counts of item outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items cancelled in flight or never started.
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} cancelled",
            self.succeeded, self.failed, self.skipped, self.cancelled
        )
    }
}

/// Progress report: `completed` only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub concurrency: usize,
    /// Cancel the rest of the batch after the first failure.
    pub fail_fast: bool,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            fail_fast: config.fail_fast,
        }
    }
}

/// Run `handler` over `items`, or over `filtered` when given.
///
/// Returns once every started item has finished. Items that were never
/// started because the batch was cancelled count as cancelled.
pub async fn process_batch<T, F, Fut>(
    items: Vec<T>,
    filtered: Option<Vec<T>>,
    options: BatchOptions,
    handler: F,
    cancel: &CancellationToken,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
) -> Result<BatchSummary>
where
    T: fmt::Display + Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ItemOutcome>> + Send + 'static,
{
    if !(1..=MAX_CONCURRENCY).contains(&options.concurrency) {
        return Err(Error::Validation(format!(
            "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
            options.concurrency
        )));
    }

    let items = match filtered {
        Some(list) => {
            tracing::info!(
                selected = list.len(),
                available = items.len(),
                "Processing filtered item list"
            );
            list
        }
        None => items,
    };
    let total = items.len();
    tracing::info!(total, concurrency = options.concurrency, "Starting batch");

    let batch_cancel = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let handler = Arc::new(handler);
    // Incremented and sent under one lock so reports stay ordered.
    let completed = Arc::new(Mutex::new(0usize));
    let mut tasks = JoinSet::new();
    let mut summary = BatchSummary::default();

    let mut pending = items.into_iter();
    while let Some(item) = pending.next() {
        let permit = tokio::select! {
            biased;
            _ = batch_cancel.cancelled() => {
                let not_started = 1 + pending.len();
                tracing::warn!(not_started, "Batch cancelled; not scheduling remaining items");
                summary.cancelled += not_started;
                break;
            }
            permit = semaphore.clone().acquire_owned() => permit
                .map_err(|_| Error::Internal("batch semaphore closed".into()))?,
        };

        let label = item.to_string();
        let handler = handler.clone();
        let item_cancel = batch_cancel.child_token();
        let batch_cancel = batch_cancel.clone();
        let completed = completed.clone();
        let progress = progress.clone();
        let fail_fast = options.fail_fast;

        tasks.spawn(async move {
            let _permit = permit;
            tracing::debug!(item = %label, "Item started");
            let outcome = handler(item, item_cancel).await;

            let failed = matches!(outcome, Ok(ItemOutcome::Failed(_)))
                || matches!(&outcome, Err(e) if !e.is_cancelled());
            if failed && fail_fast && !batch_cancel.is_cancelled() {
                tracing::warn!(item = %label, "Item failed; cancelling batch");
                batch_cancel.cancel();
            }

            {
                let mut done = completed.lock();
                *done += 1;
                if let Some(tx) = &progress {
                    // A dropped receiver only means nobody is watching.
                    let _ = tx.send(BatchProgress {
                        completed: *done,
                        total,
                    });
                }
            }
            (label, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((label, Ok(ItemOutcome::Succeeded))) => {
                tracing::info!(item = %label, "Item succeeded");
                summary.succeeded += 1;
            }
            Ok((label, Ok(ItemOutcome::Skipped(reason)))) => {
                tracing::warn!(item = %label, reason = %reason, "Item skipped");
                summary.skipped += 1;
            }
            Ok((label, Ok(ItemOutcome::Failed(reason)))) => {
                tracing::error!(item = %label, reason = %reason, "Item failed");
                summary.failed += 1;
            }
            Ok((label, Err(Error::Cancelled))) => {
                tracing::warn!(item = %label, "Item cancelled");
                summary.cancelled += 1;
            }
            Ok((label, Err(e))) => {
                tracing::error!(item = %label, error = %e, "Item failed");
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Item task panicked");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(%summary, "Batch finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn options(concurrency: usize) -> BatchOptions {
        BatchOptions {
            concurrency,
            fail_fast: false,
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        let summary = process_batch(
            (0..12).collect(),
            None,
            options(3),
            move |_: i32, _| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(ItemOutcome::Succeeded)
                }
            },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let summary = process_batch(
            (0..6).collect(),
            None,
            options(2),
            |i: i32, _| async move {
                match i {
                    1 => Err(Error::media("broken fragment")),
                    2 => Ok(ItemOutcome::Skipped("no manifest".into())),
                    3 => Ok(ItemOutcome::Failed("packager exited 2".into())),
                    4 => panic!("handler bug"),
                    _ => Ok(ItemOutcome::Succeeded),
                }
            },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                succeeded: 2,
                failed: 3,
                skipped: 1,
                cancelled: 0,
            }
        );
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn fail_fast_stops_scheduling() {
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let summary = process_batch(
            (0..10).collect(),
            None,
            BatchOptions {
                concurrency: 1,
                fail_fast: true,
            },
            move |i: i32, _| {
                s.fetch_add(1, Ordering::SeqCst);
                async move {
                    if i == 2 {
                        Ok(ItemOutcome::Failed("boom".into()))
                    } else {
                        Ok(ItemOutcome::Succeeded)
                    }
                }
            },
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 7);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn external_cancel_reaches_in_flight_items() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            process_batch(
                (0..8).collect(),
                None,
                options(2),
                |_: i32, token: CancellationToken| async move {
                    token.cancelled().await;
                    Err(Error::Cancelled)
                },
                &cancel,
                None,
            ),
        )
        .await
        .expect("cancelled batch should finish promptly")
        .unwrap();

        assert_eq!(summary.cancelled, 8);
        assert_eq!(summary.total(), 8);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        process_batch(
            (0..9).collect(),
            None,
            options(4),
            |_: i32, _| async { Ok(ItemOutcome::Succeeded) },
            &CancellationToken::new(),
            Some(tx),
        )
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            assert_eq!(p.total, 9);
            seen.push(p.completed);
        }
        assert_eq!(seen, (1..=9).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn progress_stays_ordered_across_worker_threads() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchProgress>();
        let summary = process_batch(
            (0..40).collect(),
            None,
            options(8),
            |i: i32, _| async move {
                tokio::task::yield_now().await;
                if i % 2 == 1 {
                    Err(Error::media(format!("item {i}")))
                } else {
                    Ok(ItemOutcome::Succeeded)
                }
            },
            &CancellationToken::new(),
            Some(tx),
        )
        .await
        .unwrap();
        assert_eq!(summary.failed, 20);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p.completed);
        }
        assert_eq!(seen, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_out_of_range_is_rejected() {
        let result = process_batch(
            vec![1],
            None,
            options(11),
            |_: i32, _| async { Ok(ItemOutcome::Succeeded) },
            &CancellationToken::new(),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
