//! Byte counting for streamed uploads.
//!
//! [`ProgressReader`] counts bytes as the HTTP client pulls them; the
//! reporter task logs the counter on a fixed interval until it is dropped.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::utils::{format_bytes, percent};

/// Wraps a reader and adds every byte read to a shared counter.
pub struct ProgressReader<R> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.counter)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = (buf.filled().len() - before) as u64;
            self.counter.fetch_add(read, Ordering::Relaxed);
        }
        poll
    }
}

/// Log line fields: uploaded, total, percent.
pub fn progress_fields(uploaded: u64, total: u64) -> (String, String, String) {
    (
        format_bytes(uploaded),
        format_bytes(total),
        format!("{:.1}%", percent(uploaded, total)),
    )
}

/// Periodic progress logger; stops when dropped.
pub struct ProgressReporter {
    stop_guard: DropGuard,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(file: String, total: u64, counter: Arc<AtomicU64>, every: Duration) -> Self {
        let token = CancellationToken::new();
        let stop = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let (uploaded, total, pct) =
                            progress_fields(counter.load(Ordering::Relaxed), total);
                        tracing::info!(file = %file, %uploaded, %total, percent = %pct, "Upload progress");
                    }
                }
            }
        });

        Self {
            stop_guard: token.drop_guard(),
            task,
        }
    }

    /// Stop the reporter and wait for its task to exit.
    pub async fn finish(self) {
        drop(self.stop_guard);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reader_counts_bytes() {
        let data = vec![7u8; 100_000];
        let mut reader = ProgressReader::new(std::io::Cursor::new(data.clone()));
        let counter = reader.counter();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(counter.load(Ordering::Relaxed), 100_000);
    }

    #[test]
    fn test_progress_fields() {
        assert_eq!(
            progress_fields(512, 1024),
            ("512 B".to_string(), "1.00 KB".to_string(), "50.0%".to_string())
        );
        assert_eq!(progress_fields(0, 0).2, "100.0%");
    }

    #[tokio::test]
    async fn test_reporter_stops_on_finish() {
        let counter = Arc::new(AtomicU64::new(0));
        let reporter =
            ProgressReporter::spawn("f".into(), 10, Arc::clone(&counter), Duration::from_millis(5));
        counter.store(5, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), reporter.finish())
            .await
            .expect("reporter should stop promptly");
    }

    #[tokio::test]
    async fn test_reporter_stops_on_drop() {
        let counter = Arc::new(AtomicU64::new(0));
        let reporter = ProgressReporter::spawn("f".into(), 10, counter, Duration::from_secs(60));
        let task_done = {
            let ProgressReporter { stop_guard, task } = reporter;
            drop(stop_guard);
            task
        };
        tokio::time::timeout(Duration::from_secs(1), task_done)
            .await
            .expect("task should end once the guard drops")
            .unwrap();
    }
}
