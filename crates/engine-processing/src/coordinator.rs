use crate::{
    dispatcher::EventDispatcher,
    error::{ReaderError, StreamingError},
    error_handler::ErrorHandler,
    offset_context::OffsetContext,
    reader::ChangeReader,
};
use engine_core::{
    context::TaskContext,
    error::QueueError,
    metrics::Metrics,
    queue::EventQueue,
    retry::{RetryError, RetryPolicy},
};
use model::{core::offset::Offset, events::ChangeEvent};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// How a streaming loop iteration ended.
enum Flow {
    Continue,
    Stop,
}

/// Drives the change reader and publishes events into the queue.
pub struct StreamingCoordinator<R: ChangeReader> {
    ctx: TaskContext,
    reader: Arc<Mutex<R>>,
    dispatcher: EventDispatcher,
    queue: EventQueue<ChangeEvent>,
    error_handler: ErrorHandler,
    retry: RetryPolicy,
    idle_interval: Duration,
    metrics: Metrics,
}

impl<R: ChangeReader> StreamingCoordinator<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: TaskContext,
        reader: R,
        dispatcher: EventDispatcher,
        queue: EventQueue<ChangeEvent>,
        error_handler: ErrorHandler,
        retry: RetryPolicy,
        idle_interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            ctx,
            reader: Arc::new(Mutex::new(reader)),
            dispatcher,
            queue,
            error_handler,
            retry,
            idle_interval,
            metrics,
        }
    }

    /// Spawns the streaming loop.
    pub fn start(self) -> CoordinatorHandle {
        let cancel = CancellationToken::new();
        let (published_tx, published_rx) = watch::channel(self.ctx.initial_offset.clone());
        let queue = self.queue.clone();
        let span = info_span!(
            "streaming",
            task = %self.ctx.task_name,
            context = %self.ctx.context_name,
            run_id = %self.ctx.run_id,
        );

        let loop_cancel = cancel.clone();
        let join = tokio::spawn(
            async move {
                let mut streaming = self;
                streaming.run(loop_cancel, published_tx).await;
            }
            .instrument(span),
        );

        CoordinatorHandle {
            cancel,
            join: Some(join),
            queue,
            published: published_rx,
        }
    }

    async fn run(&mut self, cancel: CancellationToken, published: watch::Sender<Option<Offset>>) {
        info!(
            partition = %self.ctx.partition,
            resume_from = ?self.ctx.initial_offset.as_ref().map(|o| o.position.to_string()),
            "Streaming started"
        );

        if let Err(e) = self.open(&cancel).await {
            if !cancel.is_cancelled() {
                self.error_handler.fail(&e);
            }
        } else {
            let mut offsets = OffsetContext::new(self.ctx.initial_offset.as_ref());
            loop {
                if cancel.is_cancelled() {
                    info!("Stop requested, leaving streaming loop");
                    break;
                }

                match self.step(&cancel, &mut offsets, &published).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => break,
                    Err(StreamingError::Publish(QueueError::Closed)) => {
                        debug!("Queue closed while publishing");
                        break;
                    }
                    Err(e) => {
                        self.error_handler.fail(&e);
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.reader.lock().await.close().await {
            warn!(error = %e, "Failed to close change reader");
        }
        info!("Streaming stopped");
    }

    async fn open(&self, cancel: &CancellationToken) -> Result<(), StreamingError> {
        let reader = self.reader.clone();
        let resume_from = self.ctx.initial_offset.clone();
        let metrics = self.metrics.clone();

        self.retry
            .run_until_cancelled(
                || {
                    let reader = reader.clone();
                    let resume_from = resume_from.clone();
                    async move { reader.lock().await.open(resume_from.as_ref()).await }
                },
                ReaderError::disposition,
                cancel,
                |_, _| metrics.increment_retries(1),
            )
            .await
            .map_err(|e| StreamingError::Open(e.into_inner()))
    }

    /// Reads one batch and publishes all of it.
    async fn step(
        &mut self,
        cancel: &CancellationToken,
        offsets: &mut OffsetContext,
        published: &watch::Sender<Option<Offset>>,
    ) -> Result<Flow, StreamingError> {
        let changes = match self.read(cancel).await {
            Ok(changes) => changes,
            Err(RetryError::Cancelled(_)) => return Ok(Flow::Stop),
            Err(RetryError::Fatal(e)) => return Err(StreamingError::Read(e)),
            Err(RetryError::AttemptsExceeded(e)) => {
                return Err(StreamingError::RetriesExhausted {
                    attempts: self.retry.max_attempts,
                    source: e,
                });
            }
        };

        if changes.is_empty() {
            self.publish_heartbeat(offsets, published).await?;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Flow::Stop),
                _ = tokio::time::sleep(self.idle_interval) => {}
            }
            return Ok(Flow::Continue);
        }

        debug!(changes = changes.len(), "Read batch");
        for change in changes {
            if let Some(resume) = &self.ctx.initial_offset {
                if resume.covers(&change.position()) {
                    self.metrics.increment_skipped(1);
                    continue;
                }
            }

            if let Some(event) = self.dispatcher.dispatch(offsets, change).await? {
                self.publish(event, published).await?;
                self.metrics.increment_events(1);
            }
        }

        self.publish_heartbeat(offsets, published).await?;
        Ok(Flow::Continue)
    }

    async fn read(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<model::events::RawChange>, RetryError<ReaderError>> {
        let reader = self.reader.clone();
        let metrics = self.metrics.clone();

        self.retry
            .run_until_cancelled(
                || {
                    let reader = reader.clone();
                    async move { reader.lock().await.read().await }
                },
                ReaderError::disposition,
                cancel,
                |_, _| metrics.increment_retries(1),
            )
            .await
    }

    async fn publish_heartbeat(
        &mut self,
        offsets: &OffsetContext,
        published: &watch::Sender<Option<Offset>>,
    ) -> Result<(), StreamingError> {
        if let Some(heartbeat) = self.dispatcher.heartbeat(offsets) {
            self.publish(heartbeat, published).await?;
            self.metrics.increment_heartbeats(1);
        }
        Ok(())
    }

    /// The published offset moves only once the event is in the queue.
    async fn publish(
        &self,
        event: ChangeEvent,
        published: &watch::Sender<Option<Offset>>,
    ) -> Result<(), StreamingError> {
        let offset = event.offset().clone();
        self.queue.enqueue(event).await?;
        published.send_replace(Some(offset));
        Ok(())
    }
}

enum StopOutcome {
    Finished(Result<(), tokio::task::JoinError>),
    ProducerBlocked,
    GraceElapsed,
}

/// Control handle of a running streaming loop.
pub struct CoordinatorHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    queue: EventQueue<ChangeEvent>,
    published: watch::Receiver<Option<Offset>>,
}

impl CoordinatorHandle {
    /// Offset of the last event placed in the queue.
    pub fn published_offset(&self) -> Option<Offset> {
        self.published.borrow().clone()
    }

    /// Follows the published offset.
    pub fn subscribe(&self) -> watch::Receiver<Option<Offset>> {
        self.published.clone()
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Stops the loop and closes the queue.
    ///
    /// The loop gets up to `grace` to publish the batch it is working on. A
    /// producer waiting for queue capacity can no longer be drained, so the
    /// queue is closed as soon as one blocks, as it is when `grace` runs out.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self, grace: Duration) {
        self.cancel.cancel();

        if let Some(mut join) = self.join.take() {
            let outcome = tokio::select! {
                result = &mut join => StopOutcome::Finished(result),
                _ = self.queue.producer_waiting() => StopOutcome::ProducerBlocked,
                _ = tokio::time::sleep(grace) => StopOutcome::GraceElapsed,
            };

            match outcome {
                StopOutcome::Finished(result) => Self::log_join(result),
                StopOutcome::ProducerBlocked => {
                    info!("Streaming loop blocked on a full queue, closing queue");
                    self.queue.close();
                    Self::log_join(join.await);
                }
                StopOutcome::GraceElapsed => {
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "Streaming loop still publishing after grace period, closing queue"
                    );
                    self.queue.close();
                    Self::log_join(join.await);
                }
            }
        }

        self.queue.close();
    }

    fn log_join(result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            error!(error = %e, "Streaming task terminated abnormally");
        }
    }
}
