use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded, unbounded};
use indicatif::ProgressBar;

use crate::mediasort_core::backend::StorageBackend;
use crate::mediasort_core::date::{DateResolver, ResolvedDate};
use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::media::MediaItem;
use crate::mediasort_core::sorter::CancellationToken;

/// Resolve the creation date of every item on a pool of `num_workers` threads.
///
/// The result is indexed like `items`. An entry is `None` only when the run was
/// cancelled before a worker reached it. A read that outlives `timeout` leaves
/// the item with its fallback date.
pub fn resolve_dates(
    items: &[MediaItem],
    resolver: &DateResolver,
    backend: &Arc<dyn StorageBackend>,
    num_workers: usize,
    timeout: Option<Duration>,
    token: &CancellationToken,
    bar: &ProgressBar,
) -> Vec<Option<ResolvedDate>> {
    let (job_tx, job_rx) = unbounded::<usize>();
    let (result_tx, result_rx) = unbounded::<(usize, ResolvedDate)>();

    // Queue everything up front so no worker ever blocks waiting on the feeder.
    for index in 0..items.len() {
        if job_tx.send(index).is_err() {
            log::error!("Failed to queue date resolution job");
            break;
        }
    }
    drop(job_tx);

    rayon::scope(|s| {
        for _ in 0..num_workers.max(1) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();

            s.spawn(move |_| {
                for index in job_rx {
                    if token.is_cancelled() {
                        break;
                    }
                    let resolved = resolve_one(&items[index], resolver, backend, timeout);
                    bar.inc(1);
                    if result_tx.send((index, resolved)).is_err() {
                        log::error!("Failed to send resolved date to main thread");
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut dates = vec![None; items.len()];
    for (index, resolved) in result_rx.iter() {
        dates[index] = Some(resolved);
    }
    dates
}

fn resolve_one(
    item: &MediaItem,
    resolver: &DateResolver,
    backend: &Arc<dyn StorageBackend>,
    timeout: Option<Duration>,
) -> ResolvedDate {
    if timeout.is_none() {
        return resolver.resolve(item, backend.as_ref());
    }

    let job_item = item.clone();
    let resolver = resolver.clone();
    let backend = Arc::clone(backend);
    let resolved = run_with_timeout(&item.source_key, timeout, move || {
        Ok(resolver.resolve(&job_item, backend.as_ref()))
    });
    resolved.unwrap_or_else(|e| {
        log::warn!("Reading metadata of {} failed, using fallback date: {}", item.source_key, e);
        ResolvedDate::fallback(item)
    })
}

/// Run `job` on a helper thread and wait at most `timeout` for it.
///
/// Without a timeout the job runs inline. A job that overruns keeps running
/// detached; its result is discarded.
pub fn run_with_timeout<T, F>(label: &str, timeout: Option<Duration>, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let Some(limit) = timeout else {
        return job();
    };

    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("mediasort-item".to_string())
        .spawn(move || {
            // The receiver is gone if we already timed out.
            let _ = tx.send(job());
        })?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(MediasortError::Timeout {
            key: label.to_string(),
            seconds: limit.as_secs(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(MediasortError::Other(format!(
            "work on '{}' ended without a result",
            label
        ))),
    }
}
