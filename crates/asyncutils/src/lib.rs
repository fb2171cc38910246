//! Async helpers shared by the tinyimage pipeline.
//!
//! The only primitive here is [`run_bounded`]: every batch of compute or
//! write work in a session is exactly one call to it.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of consumers [`run_bounded`] starts for `len` items.
///
/// `max(1, min(limit, len))`: a zero limit still makes progress, and no
/// consumer is started that could never claim an item.
#[inline]
#[must_use]
pub fn effective_concurrency(limit: usize, len: usize) -> usize {
    limit.min(len).max(1)
}

/// Run `worker` over every item with at most `limit` invocations in flight.
///
/// Consumers share a single cursor. Each one claims the next unclaimed index,
/// awaits the worker for it, and only then claims again, so items are claimed
/// in order exactly once while completion order is unspecified. The call
/// returns once every consumer has drained the queue; results come back in
/// item order regardless of when they finished.
///
/// The runner never short-circuits. If the worker can fail, it should return
/// a `Result` and the caller decides what to do with failures afterwards.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use tinyimage_asyncutils::run_bounded;
///
/// let lengths = run_bounded(&["a.jpg", "bb.png", "ccc.webp"], 2, |name| async move { name.len() }).await;
/// assert_eq!(lengths, vec![5, 6, 8]);
/// # }
/// ```
pub async fn run_bounded<'a, T, R, F, Fut>(items: &'a [T], limit: usize, worker: F) -> Vec<R>
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = R>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let consumers = effective_concurrency(limit, items.len());
    tracing::trace!(items = items.len(), consumers, "Starting bounded run");

    let cursor = &AtomicUsize::new(0);
    let worker = &worker;
    let drained = join_all((0..consumers).map(|_| async move {
        let mut completed = Vec::new();
        loop {
            let index = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(item) = items.get(index) else {
                break;
            };
            completed.push((index, worker(item).await));
        }
        completed
    }))
    .await;

    let mut results: Vec<(usize, R)> = drained.into_iter().flatten().collect();
    results.sort_unstable_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}
