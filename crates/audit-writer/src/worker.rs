//! The single consumer loop that drains the queue into cached handles.

use crate::cache::HandleCache;
use crate::error::{Error, Result};
use crate::opener::{AppendHandle, AppendOpener};
use crate::stats::WriterStats;
use crate::writer::LogEntry;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Line terminator appended after every entry.
#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";

/// Line terminator appended after every entry.
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

/// Everything the worker owns. Survives stop/start so queued entries and open handles
/// carry over to the next run.
pub struct WorkerState<O: AppendOpener> {
    pub(crate) receiver: mpsc::Receiver<LogEntry>,
    pub(crate) cache: HandleCache<O>,
}

/// Runs until `shutdown_token` is cancelled or every sender is gone.
///
/// Cancellation is only observed while waiting for the next entry, so an entry that
/// has been received is always written (or fails) before the loop exits.
pub async fn run<O: AppendOpener>(
    state: &mut WorkerState<O>,
    shutdown_token: CancellationToken,
    maintenance_interval: Duration,
    stats: &WriterStats,
) {
    let mut last_sweep = Instant::now();

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            received = timeout(maintenance_interval, state.receiver.recv()) => received,
        };

        match received {
            Err(_) => {
                state.cache.maintenance().await;
                last_sweep = Instant::now();
            }
            Ok(Some(entry)) => {
                let outcome = AssertUnwindSafe(write_entry(&mut state.cache, &entry, stats))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => WriterStats::incr(&stats.written),
                    Ok(Err(error)) => {
                        error!(%error, "error writing audit entry to file");
                    }
                    Err(panic) => {
                        WriterStats::incr(&stats.unknown_failures);
                        let error = Error::Unknown(panic_message(panic.as_ref()));
                        error!(%error, path = %entry.path, "error writing audit entry to file");
                    }
                }

                // Under constant traffic the receive never times out.
                if last_sweep.elapsed() >= maintenance_interval {
                    state.cache.maintenance().await;
                    last_sweep = Instant::now();
                }
            }
            Ok(None) => {
                debug!("audit queue closed, releasing handles");
                state.cache.close_all().await;
                break;
            }
        }
    }
}

async fn write_entry<O: AppendOpener>(
    cache: &mut HandleCache<O>,
    entry: &LogEntry,
    stats: &WriterStats,
) -> Result<()> {
    let handle = cache.get(&entry.path).await?;

    let written = async {
        handle.write_all(entry.line.as_bytes()).await?;
        handle.write_all(LINE_SEPARATOR.as_bytes()).await?;
        handle.flush().await
    }
    .await;

    written.map_err(|source| {
        WriterStats::incr(&stats.write_failures);
        Error::Write {
            path: entry.path.clone(),
            source,
        }
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryOpener;

    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn state(
        capacity: usize,
    ) -> (
        WorkerState<MemoryOpener>,
        mpsc::Sender<LogEntry>,
        MemoryOpener,
        Arc<WriterStats>,
    ) {
        let opener = MemoryOpener::new();
        let stats = Arc::new(WriterStats::default());
        let (sender, receiver) = mpsc::channel(capacity);
        let state = WorkerState {
            receiver,
            cache: HandleCache::new(Arc::new(opener.clone()), TIMEOUT, stats.clone()),
        };
        (state, sender, opener, stats)
    }

    fn entry(path: &str, line: &str) -> LogEntry {
        LogEntry {
            path: path.to_string(),
            line: line.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_in_order_until_senders_drop() {
        let (mut state, sender, opener, stats) = state(10);

        for (path, line) in [("a", "1"), ("b", "2"), ("a", "3")] {
            sender.try_send(entry(path, line)).unwrap();
        }
        drop(sender);

        run(&mut state, CancellationToken::new(), TIMEOUT * 2, &stats).await;

        assert_eq!(opener.content("a").as_deref(), Some("1\n3\n"));
        assert_eq!(opener.content("b").as_deref(), Some("2\n"));
        assert_eq!(stats.snapshot().written, 3);
        // Closing the queue releases every handle.
        assert_eq!(opener.open_handles("a"), 0);
        assert_eq!(opener.open_handles("b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_loop_leaves_queue_untouched() {
        let (mut state, sender, opener, stats) = state(10);
        sender.try_send(entry("a", "1")).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        run(&mut state, token, TIMEOUT * 2, &stats).await;

        assert_eq!(opener.open_count("a"), 0);
        assert_eq!(state.receiver.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_destination_does_not_stop_worker() {
        let (mut state, sender, opener, stats) = state(10);
        opener.set_fail_open("bad", true);
        opener.set_fail_write("broken", true);
        opener.set_panic_open("panics", true);

        for (path, line) in [("bad", "x"), ("broken", "y"), ("panics", "z"), ("good", "ok")] {
            sender.try_send(entry(path, line)).unwrap();
        }
        drop(sender);

        run(&mut state, CancellationToken::new(), TIMEOUT * 2, &stats).await;

        let snapshot = stats.snapshot();
        assert_eq!(opener.content("good").as_deref(), Some("ok\n"));
        assert_eq!(snapshot.written, 1);
        assert_eq!(snapshot.open_failures, 1);
        assert_eq!(snapshot.write_failures, 1);
        assert_eq!(snapshot.unknown_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_triggers_maintenance() {
        let (mut state, sender, opener, stats) = state(10);
        sender.try_send(entry("x", "1")).unwrap();

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker_stats = stats.clone();
        let task = tokio::spawn(async move {
            run(&mut state, worker_token, TIMEOUT + Duration::from_secs(1), &worker_stats).await;
            state
        });

        tokio::time::sleep(TIMEOUT + Duration::from_secs(2)).await;
        assert_eq!(opener.close_count("x"), 1);
        assert_eq!(stats.snapshot().evicted, 1);

        sender.try_send(entry("x", "2")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        token.cancel();
        let state = task.await.unwrap();

        assert_eq!(opener.open_count("x"), 2);
        assert_eq!(opener.content("x").as_deref(), Some("1\n2\n"));
        assert!(state.cache.contains("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_panicking_close_in_sweep() {
        let (mut state, sender, opener, stats) = state(10);
        opener.set_panic_close("boom", true);
        sender.try_send(entry("boom", "1")).unwrap();

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker_stats = stats.clone();
        let task = tokio::spawn(async move {
            run(&mut state, worker_token, TIMEOUT + Duration::from_secs(1), &worker_stats).await;
            state
        });

        // Past the receive timeout, so the idle sweep releases "boom".
        tokio::time::sleep(TIMEOUT + Duration::from_secs(2)).await;
        assert_eq!(opener.close_count("boom"), 1);
        assert_eq!(stats.snapshot().unknown_failures, 1);
        assert!(!task.is_finished());

        sender.try_send(entry("other", "2")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(opener.content("other").as_deref(), Some("2\n"));
        assert_eq!(stats.snapshot().written, 2);

        token.cancel();
        let state = task.await.unwrap();
        assert!(!state.cache.contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_under_constant_traffic() {
        let (mut state, sender, opener, stats) = state(10);
        sender.try_send(entry("a", "1")).unwrap();

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker_stats = stats.clone();
        let task = tokio::spawn(async move {
            run(&mut state, worker_token, TIMEOUT + Duration::from_secs(1), &worker_stats).await;
            state
        });

        // One entry a second keeps the four second receive wait from ever timing out.
        for i in 0..6 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            sender.try_send(entry("b", &i.to_string())).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(opener.close_count("a"), 1);
        assert_eq!(opener.close_count("b"), 0);
        assert_eq!(stats.snapshot().written, 7);

        token.cancel();
        let state = task.await.unwrap();
        assert!(!state.cache.contains("a"));
        assert!(state.cache.contains("b"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }
}
