use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use metrics::counter;
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::trace;

type FlushFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct WindowState<T> {
    pending: Option<T>,
    window_open: bool,
    closed: bool,
}

struct Inner<T> {
    window: Duration,
    flush: FlushFn<T>,
    state: Mutex<WindowState<T>>,
    flush_lock: Mutex<()>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Leading-and-trailing throttle over an async flush function.
///
/// The first value after an idle period is flushed at once. Values scheduled
/// while a window is open overwrite each other and the latest one is flushed
/// when the window ends, which opens the next window. Flushes never overlap.
pub struct CoalescingScheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> fmt::Debug for CoalescingScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingScheduler")
            .field("window", &self.inner.window)
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> CoalescingScheduler<T> {
    pub fn new<F, Fut>(window: Duration, flush: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                window,
                flush: Arc::new(move |value| flush(value).boxed()),
                state: Mutex::new(WindowState {
                    pending: None,
                    window_open: false,
                    closed: false,
                }),
                flush_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Requests a flush of `value`, subject to the window.
    ///
    /// A leading flush runs before this returns. Ignored once closed.
    pub async fn schedule(&self, value: T) {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return;
            }
            if state.window_open {
                if state.pending.replace(value).is_some() {
                    counter!("relaybot_throttle_coalesced_total").increment(1);
                }
                return;
            }
            state.window_open = true;
        }

        let _guard = self.inner.flush_lock.lock().await;
        if self.inner.state.lock().await.closed {
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.run_windows().await });

        trace!("leading flush");
        (self.inner.flush)(value).await;
    }

    /// Discards anything pending, waits for an in-flight flush, then flushes
    /// `value` as the last value this scheduler will ever flush.
    ///
    /// Returns `false` without flushing if the scheduler was already closed.
    pub async fn flush_now(&self, value: T) -> bool {
        if !self.shut().await {
            return false;
        }
        {
            let _guard = self.inner.flush_lock.lock().await;
            trace!("final flush");
            (self.inner.flush)(value).await;
        }
        self.drain().await;
        true
    }

    /// Stops all future flushes without a final one.
    pub async fn close(&self) {
        if self.shut().await {
            self.drain().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn shut(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return false;
        }
        state.closed = true;
        state.window_open = false;
        state.pending = None;
        self.inner.shutdown.cancel();
        true
    }

    async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl<T: Send + 'static> Inner<T> {
    async fn run_windows(&self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.window) => {}
            }

            let _guard = self.flush_lock.lock().await;
            let value = {
                let mut state = self.state.lock().await;
                if state.closed {
                    break;
                }
                match state.pending.take() {
                    Some(value) => value,
                    None => {
                        state.window_open = false;
                        break;
                    }
                }
            };

            trace!("trailing flush");
            (self.flush)(value).await;
        }
    }
}
