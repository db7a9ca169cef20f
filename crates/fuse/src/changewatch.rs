//! Debounced change notification.
//!
//! `on_change` is a non-blocking signal. The worker arms a delay timer on
//! the first signal; further signals during the window coalesce into the
//! single pending flush, and the action runs once when the timer expires.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type Action = Arc<dyn Fn() -> BoxFuture<'static, std::io::Result<()>> + Send + Sync>;

/// Options for a change watch.
pub struct Options {
    pub delay: Duration,
    pub action: Action,
}

/// A handle for signalling changes. Dropping it stops the worker once the
/// pending flush (if any) has run.
#[derive(Clone)]
pub struct ChangeWatch {
    tx: mpsc::Sender<()>,
}

impl ChangeWatch {
    /// Spawn the debouncing worker.
    pub fn spawn(opts: Options) -> Self {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(worker(rx, opts));
        Self { tx }
    }

    /// Signal a change. Never blocks; a full channel means a signal is
    /// already pending.
    pub fn on_change(&self) {
        let _ = self.tx.try_send(());
    }
}

async fn worker(mut rx: mpsc::Receiver<()>, opts: Options) {
    loop {
        if rx.recv().await.is_none() {
            return;
        }

        // Armed. Swallow further signals until the delay expires.
        let deadline = tokio::time::sleep(opts.delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                more = rx.recv() => {
                    if more.is_none() {
                        break;
                    }
                }
            }
        }

        if let Err(err) = (opts.action)().await {
            tracing::error!(error = %err, "change-watch action failed");
        }
    }
}

/// Touch a marker file: bump its mtime, creating it read-only if absent.
pub async fn touch_file(path: std::path::PathBuf) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || match std::fs::File::options().write(true).open(&path) {
        Ok(file) => file.set_modified(std::time::SystemTime::now()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::File::options()
                .write(true)
                .create_new(true)
                .mode(0o440)
                .open(&path)
                .map(|_| ())
        }
        Err(err) => Err(err),
    })
    .await
    .expect("touch task panicked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_watch(delay: Duration) -> (ChangeWatch, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let action_counter = counter.clone();
        let watch = ChangeWatch::spawn(Options {
            delay,
            action: Arc::new(move || {
                let counter = action_counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        });
        (watch, counter)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_signals_coalesces_to_one_flush() {
        let (watch, counter) = counting_watch(Duration::from_secs(1));

        for _ in 0..10 {
            watch.on_change();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separated_signals_flush_separately() {
        let (watch, counter) = counting_watch(Duration::from_millis(100));

        watch.on_change();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        watch.on_change();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_signal_means_no_flush() {
        let (_watch, counter) = counting_watch(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn touch_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker");

        touch_file(path.clone()).await.unwrap();
        assert!(path.exists());

        let first = std::fs::metadata(&path).unwrap().modified().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        touch_file(path.clone()).await.unwrap();
        let second = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(second >= first);
    }
}
