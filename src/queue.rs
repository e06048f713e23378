//! Queued batch publisher.
//!
//! Outbound envelopes enqueued through `Router::publish_queued` accumulate
//! here and are flushed together on a fixed interval to cut per-publish
//! transport overhead. Each tick drains the whole queue in one pass; every
//! item's future resolves independently, so one item's transport failure
//! never fails its siblings. Shutdown forces one final drain inside a grace
//! period so no queued envelope is silently lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::correlation::{CorrelationCache, PendingReceiver};
use crate::error::{BridgeError, BridgeResult};
use crate::transport::Transport;

/// Result of a flush: the ack receiver when the item opted into
/// acknowledgement, `None` otherwise.
pub(crate) type FlushOutcome = BridgeResult<Option<PendingReceiver<Uuid>>>;

/// An envelope waiting for the next batch tick. Owned by the queue from
/// enqueue until flush.
struct QueuedEnvelope {
    id: Uuid,
    channel: String,
    payload: String,
    ack_requested: bool,
    done: oneshot::Sender<FlushOutcome>,
}

struct QueueInner {
    queue: Mutex<VecDeque<QueuedEnvelope>>,
    interval_ms: AtomicU64,
    // Written under the queue mutex in `stop`, so an enqueue that saw it
    // unset is guaranteed to land before the leftover drain.
    stopped: AtomicBool,
    transport: Arc<dyn Transport>,
    acks: Arc<CorrelationCache<Uuid>>,
}

impl QueueInner {
    /// Drains the entire current queue in one pass.
    async fn drain_once(&self) {
        let batch: Vec<QueuedEnvelope> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "flushing queued envelopes");
        for item in batch {
            self.flush_item(item).await;
        }
    }

    async fn flush_item(&self, item: QueuedEnvelope) {
        // The ack expectation starts at flush, not enqueue: the ack clock
        // must not run while the envelope is still sitting in the queue.
        let ack_rx = item.ack_requested.then(|| self.acks.insert(item.id));
        match self.transport.publish(&item.channel, item.payload).await {
            Ok(()) => {
                let _ = item.done.send(Ok(ack_rx));
            }
            Err(e) => {
                if ack_rx.is_some() {
                    self.acks.discard(item.id);
                }
                let _ = item.done.send(Err(BridgeError::Transport(e)));
            }
        }
    }
}

/// Background publisher draining the outbound queue on a timer.
pub(crate) struct QueuePublisher {
    inner: Arc<QueueInner>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuePublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        acks: Arc<CorrelationCache<Uuid>>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                interval_ms: AtomicU64::new(interval.as_millis() as u64),
                stopped: AtomicBool::new(false),
                transport,
                acks,
            }),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// Starts the tick worker. Idempotent per load/unload cycle.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *worker = Some(tokio::spawn(async move {
            loop {
                let interval = Duration::from_millis(inner.interval_ms.load(Ordering::Relaxed));
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => inner.drain_once().await,
                }
            }
            // Final drain so nothing enqueued before shutdown is lost.
            inner.drain_once().await;
        }));
    }

    /// Enqueues one encoded envelope; the returned receiver resolves when the
    /// batch publisher flushes it. After `stop` it resolves immediately with
    /// a shutdown error instead of parking the item forever.
    pub async fn enqueue(
        &self,
        id: Uuid,
        channel: String,
        payload: String,
        ack_requested: bool,
    ) -> oneshot::Receiver<FlushOutcome> {
        let (done, rx) = oneshot::channel();
        let mut queue = self.inner.queue.lock().await;
        if self.inner.stopped.load(Ordering::Acquire) {
            drop(queue);
            let _ = done.send(Err(BridgeError::ShuttingDown));
            return rx;
        }
        queue.push_back(QueuedEnvelope {
            id,
            channel,
            payload,
            ack_requested,
            done,
        });
        rx
    }

    /// Changes the flush interval. The worker re-reads it after each tick,
    /// so a shorter interval takes effect once the current delay elapses;
    /// call before `start` to configure the first tick.
    pub fn set_interval(&self, interval: Duration) {
        self.inner
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Stops the worker, forcing a final drain. Items still queued after the
    /// grace period fail with a shutdown error.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("queue drain did not finish within the grace period");
                abort.abort();
            }
        }
        let leftovers: Vec<QueuedEnvelope> = {
            let mut queue = self.inner.queue.lock().await;
            self.inner.stopped.store(true, Ordering::Release);
            queue.drain(..).collect()
        };
        for item in leftovers {
            let _ = item.done.send(Err(BridgeError::ShuttingDown));
        }
    }
}
