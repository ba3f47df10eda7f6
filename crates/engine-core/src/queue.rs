use crate::error::QueueError;
use model::events::ChangeEvent;
use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{
    Mutex, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError,
    mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Items that can be charged against the queue's byte budget.
pub trait Sizeable {
    fn size_bytes(&self) -> usize;
}

impl Sizeable for ChangeEvent {
    fn size_bytes(&self) -> usize {
        self.record().size_bytes()
    }
}

struct Queued<T> {
    item: T,
    // Released when the item leaves the queue.
    _bytes: Option<OwnedSemaphorePermit>,
}

struct Shared {
    closed: CancellationToken,
    failure: OnceLock<String>,
    bytes: Option<Arc<Semaphore>>,
    byte_budget: u32,
    waiting: AtomicUsize,
    waiting_changed: Notify,
}

/// Marks a producer as blocked on capacity for as long as it lives.
struct WaitingProducer<'a>(&'a Shared);

impl<'a> WaitingProducer<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.waiting.fetch_add(1, Ordering::SeqCst);
        shared.waiting_changed.notify_waiters();
        Self(shared)
    }
}

impl Drop for WaitingProducer<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded FIFO buffer between the streaming producer(s) and the polling consumer.
///
/// Capacity is bounded by item count and, optionally, by the aggregate size of
/// the buffered items. Producers wait while the queue is full. The handle is
/// cheap to clone; every clone feeds the same queue.
pub struct EventQueue<T> {
    tx: mpsc::Sender<Queued<T>>,
    rx: Arc<Mutex<mpsc::Receiver<Queued<T>>>>,
    shared: Arc<Shared>,
    poll_interval: Duration,
    max_batch_size: usize,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            shared: self.shared.clone(),
            poll_interval: self.poll_interval,
            max_batch_size: self.max_batch_size,
        }
    }
}

pub struct EventQueueBuilder {
    poll_interval: Duration,
    max_batch_size: usize,
    max_queue_size: usize,
    max_queue_size_in_bytes: usize,
}

impl Default for EventQueueBuilder {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_batch_size: 2048,
            max_queue_size: 8192,
            max_queue_size_in_bytes: 0,
        }
    }
}

impl EventQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Aggregate size limit; 0 disables it.
    pub fn max_queue_size_in_bytes(mut self, bytes: usize) -> Self {
        self.max_queue_size_in_bytes = bytes;
        self
    }

    pub fn build<T: Sizeable>(self) -> Result<EventQueue<T>, QueueError> {
        if self.max_queue_size == 0 {
            return Err(QueueError::InvalidConfig(
                "max_queue_size must be greater than 0".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(QueueError::InvalidConfig(
                "max_batch_size must be greater than 0".into(),
            ));
        }

        let byte_budget = self.max_queue_size_in_bytes.min(u32::MAX as usize) as u32;
        let bytes = (byte_budget > 0).then(|| Arc::new(Semaphore::new(byte_budget as usize)));
        let (tx, rx) = mpsc::channel(self.max_queue_size);

        Ok(EventQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            shared: Arc::new(Shared {
                closed: CancellationToken::new(),
                failure: OnceLock::new(),
                bytes,
                byte_budget,
                waiting: AtomicUsize::new(0),
                waiting_changed: Notify::new(),
            }),
            poll_interval: self.poll_interval,
            max_batch_size: self.max_batch_size,
        })
    }
}

impl<T: Sizeable> EventQueue<T> {
    /// Appends an item, waiting while the queue is at capacity.
    ///
    /// Never drops an item: it either lands in the queue or the call fails
    /// because the queue was closed.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let closed = &self.shared.closed;
        if closed.is_cancelled() {
            return Err(self.terminal_error());
        }

        let bytes = match &self.shared.bytes {
            Some(semaphore) => {
                // An item larger than the whole budget is admitted alone.
                let needed = item.size_bytes().clamp(1, self.shared.byte_budget as usize) as u32;
                let permit = match semaphore.clone().try_acquire_many_owned(needed) {
                    Ok(permit) => permit,
                    Err(TryAcquireError::Closed) => return Err(self.terminal_error()),
                    Err(TryAcquireError::NoPermits) => {
                        let _waiting = WaitingProducer::enter(&self.shared);
                        tokio::select! {
                            biased;
                            _ = closed.cancelled() => return Err(self.terminal_error()),
                            permit = semaphore.clone().acquire_many_owned(needed) => {
                                permit.map_err(|_| self.terminal_error())?
                            }
                        }
                    }
                };
                Some(permit)
            }
            None => None,
        };

        let slot = match self.tx.try_reserve() {
            Ok(slot) => slot,
            Err(TrySendError::Closed(())) => return Err(self.terminal_error()),
            Err(TrySendError::Full(())) => {
                let _waiting = WaitingProducer::enter(&self.shared);
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => return Err(self.terminal_error()),
                    slot = self.tx.reserve() => slot.map_err(|_| self.terminal_error())?,
                }
            }
        };

        slot.send(Queued {
            item,
            _bytes: bytes,
        });
        trace!(remaining = self.remaining_capacity(), "Enqueued event");
        Ok(())
    }
}

impl<T> EventQueue<T> {
    /// Returns the next batch of at most `max_batch_size` items.
    ///
    /// Waits up to the poll interval for the first item, then takes whatever
    /// else is already buffered. An empty batch means no work yet. Once the
    /// queue is closed the call returns immediately with a terminal error and
    /// any still-buffered items are discarded.
    pub async fn poll(&self) -> Result<Vec<T>, QueueError> {
        if let Some(reason) = self.shared.failure.get() {
            return Err(QueueError::ProducerFailed(reason.clone()));
        }

        let closed = &self.shared.closed;
        let mut rx = self.rx.lock().await;
        if closed.is_cancelled() {
            Self::discard(&mut rx);
            return Err(self.terminal_error());
        }

        let first = tokio::select! {
            biased;
            _ = closed.cancelled() => {
                Self::discard(&mut rx);
                return Err(self.terminal_error());
            }
            received = tokio::time::timeout(self.poll_interval, rx.recv()) => match received {
                Ok(Some(queued)) => queued.item,
                Ok(None) => return Err(self.terminal_error()),
                Err(_) => return Ok(Vec::new()),
            },
        };

        let mut batch = Vec::with_capacity(self.max_batch_size.min(64));
        batch.push(first);
        while batch.len() < self.max_batch_size {
            match rx.try_recv() {
                Ok(queued) => batch.push(queued.item),
                Err(_) => break,
            }
        }

        debug!(size = batch.len(), "Polled batch");
        Ok(batch)
    }

    /// Shuts the queue down, releasing every waiting producer and consumer.
    pub fn close(&self) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        debug!("Closing event queue");
        if let Some(semaphore) = &self.shared.bytes {
            semaphore.close();
        }
        self.shared.closed.cancel();
    }

    /// Records a producer failure and closes the queue.
    ///
    /// The first failure wins; the next `poll` reports it to the consumer.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.shared.failure.set(reason.clone()).is_err() {
            warn!(%reason, "Queue already failed, ignoring subsequent failure");
        }
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub fn failure(&self) -> Option<&str> {
        self.shared.failure.get().map(String::as_str)
    }

    /// True while at least one producer waits for capacity.
    pub fn has_waiting_producers(&self) -> bool {
        self.shared.waiting.load(Ordering::SeqCst) > 0
    }

    /// Resolves once a producer is blocked on a full queue.
    pub async fn producer_waiting(&self) {
        loop {
            let notified = self.shared.waiting_changed.notified();
            if self.has_waiting_producers() {
                return;
            }
            notified.await;
        }
    }

    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Number of buffered items, including slots reserved by waiting producers.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn terminal_error(&self) -> QueueError {
        match self.shared.failure.get() {
            Some(reason) => QueueError::ProducerFailed(reason.clone()),
            None => QueueError::Closed,
        }
    }

    fn discard(rx: &mut mpsc::Receiver<Queued<T>>) {
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded events buffered at shutdown");
        }
    }
}
