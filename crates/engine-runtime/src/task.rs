use crate::{connector::SourceConnector, error::TaskError};
use engine_config::{TaskConfig, settings::driver::apply_fetch_size};
use engine_core::{
    connection::ConnectionManager,
    context::TaskContext,
    error::QueueError,
    metrics::{Metrics, MetricsSnapshot},
    offsets::{self, OffsetBackingStore, SinglePartitionProvider},
    queue::{EventQueue, EventQueueBuilder},
    retry::RetryPolicy,
    schema::DatabaseSchema,
};
use engine_processing::{
    coordinator::{CoordinatorHandle, StreamingCoordinator},
    dispatcher::{EventDispatcher, SourceDescriptor},
    error_handler::ErrorHandler,
    filter::TableFilter,
    signal::{SignalHandle, SignalProcessor},
};
use model::{
    core::offset::Offset,
    events::ChangeEvent,
    records::record::SourceRecord,
};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Running,
            2 => TaskState::Stopping,
            _ => TaskState::Stopped,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Stopping => "stopping",
            TaskState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Everything acquired by `start`, released by `stop`.
///
/// Filled step by step so that a failed start releases exactly what it got.
struct Resources<S: SourceConnector> {
    connections: Option<ConnectionManager<S::Connection>>,
    schema: Option<Arc<dyn DatabaseSchema>>,
    coordinator: Option<CoordinatorHandle>,
    signals: Option<SignalHandle>,
    shutdown_timeout: Duration,
}

impl<S: SourceConnector> Default for Resources<S> {
    fn default() -> Self {
        Self {
            connections: None,
            schema: None,
            coordinator: None,
            signals: None,
            shutdown_timeout: Duration::from_millis(5000),
        }
    }
}

/// Lifecycle controller of one CDC task.
///
/// `poll` and `stop` may be called concurrently; a `stop` releases a `poll`
/// blocked waiting for events.
pub struct CdcTask<S: SourceConnector> {
    connector: S,
    offsets: Arc<dyn OffsetBackingStore>,
    metrics: Metrics,
    state: AtomicU8,
    queue: RwLock<Option<EventQueue<ChangeEvent>>>,
    resources: Mutex<Resources<S>>,
}

impl<S: SourceConnector> CdcTask<S> {
    pub fn new(connector: S, offsets: Arc<dyn OffsetBackingStore>) -> Self {
        Self {
            connector,
            offsets,
            metrics: Metrics::new(),
            state: AtomicU8::new(TaskState::Created as u8),
            queue: RwLock::new(None),
            resources: Mutex::new(Resources::default()),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn connector(&self) -> &S {
        &self.connector
    }

    /// Offset of the last event the streaming loop placed in the queue.
    pub async fn published_offset(&self) -> Option<Offset> {
        self.resources
            .lock()
            .await
            .coordinator
            .as_ref()
            .and_then(CoordinatorHandle::published_offset)
    }

    /// Opens the source, resolves where to resume and starts streaming.
    ///
    /// A rejected configuration fails before anything is opened. Any later
    /// failure releases whatever was acquired and leaves the task stopped.
    pub async fn start(&self, config: TaskConfig) -> Result<(), TaskError> {
        let mut resources = self.resources.lock().await;
        let state = self.state();
        if state != TaskState::Created {
            return Err(TaskError::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        }

        config.validate()?;
        let config = apply_fetch_size(&config);
        resources.shutdown_timeout = config.shutdown_timeout();

        info!(
            task = %config.name,
            connector = self.connector.name(),
            partition = %config.partition(),
            "Starting task"
        );

        match self.launch(&config, &mut resources).await {
            Ok(()) => {
                self.set_state(TaskState::Running);
                info!(task = %config.name, "Task started");
                Ok(())
            }
            Err(e) => {
                error!(task = %config.name, error = %e, "Task failed to start, releasing resources");
                self.release(&mut resources).await;
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        config: &TaskConfig,
        resources: &mut Resources<S>,
    ) -> Result<(), TaskError> {
        let factory = self
            .connector
            .connection_factory(config)
            .map_err(TaskError::Connector)?;
        let connections = ConnectionManager::open(factory.as_ref()).await?;
        let main = connections.main_connection()?;
        let metadata = connections.metadata_connection()?;
        resources.connections = Some(connections);

        let schema = self.connector.schema(config).map_err(TaskError::Connector)?;
        resources.schema = Some(schema.clone());
        schema.initialize_storage().await?;

        let provider = SinglePartitionProvider(config.partition());
        let (partition, previous) = offsets::resolve(&provider, self.offsets.as_ref())
            .await?
            .into_single()?;

        match &previous {
            Some(offset) => {
                info!(position = %offset.position, "Recovering schema history");
                schema.recover(&partition, offset).await?;
            }
            None => info!("No previous offset, starting from the beginning of the stream"),
        }

        let ctx = TaskContext::new(&config.name, partition, previous, schema);

        let queue: EventQueue<ChangeEvent> = EventQueueBuilder::new()
            .poll_interval(config.poll_interval())
            .max_batch_size(config.max_batch_size)
            .max_queue_size(config.max_queue_size)
            .max_queue_size_in_bytes(config.max_queue_size_in_bytes)
            .build()?;
        *self.queue.write().await = Some(queue.clone());

        let error_handler = ErrorHandler::new(queue.clone(), self.metrics.clone());
        let topics = self.connector.topic_naming(config);
        let dispatcher = EventDispatcher::new(
            &ctx,
            TableFilter::from_config(config),
            topics.clone(),
            SourceDescriptor {
                connector: self.connector.name().to_string(),
                version: self.connector.version().to_string(),
                server_name: config.server_name.clone(),
            },
        )
        .with_heartbeat(config.heartbeat_interval());

        let reader = self
            .connector
            .reader(config, main, metadata)
            .map_err(TaskError::Connector)?;

        let coordinator = StreamingCoordinator::new(
            ctx.clone(),
            reader,
            dispatcher,
            queue.clone(),
            error_handler,
            RetryPolicy::from(&config.retry),
            config.poll_interval(),
            self.metrics.clone(),
        )
        .start();

        let channels = self.connector.signal_channels(config);
        if !channels.is_empty() {
            resources.signals = Some(
                SignalProcessor::new(
                    &ctx,
                    topics.as_ref(),
                    channels,
                    queue,
                    coordinator.subscribe(),
                    config.signal_poll_interval(),
                    self.metrics.clone(),
                )
                .start(),
            );
        }
        resources.coordinator = Some(coordinator);
        Ok(())
    }

    /// Next batch of records, empty when none arrived within the poll interval.
    ///
    /// Returns an empty batch when the task is not running. A fatal streaming
    /// failure is reported as [`TaskError::Failed`].
    pub async fn poll(&self) -> Result<Vec<SourceRecord>, TaskError> {
        if self.state() != TaskState::Running {
            return Ok(Vec::new());
        }
        let Some(queue) = self.queue.read().await.clone() else {
            return Ok(Vec::new());
        };

        match queue.poll().await {
            Ok(events) => {
                self.metrics.record_poll(events.len() as u64);
                Ok(events.into_iter().map(ChangeEvent::into_record).collect())
            }
            Err(QueueError::Closed) => Ok(Vec::new()),
            Err(QueueError::ProducerFailed(reason)) => Err(TaskError::Failed(reason)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the offset of the last record of a batch the host has handled.
    ///
    /// Notification records are skipped: they repeat an already published
    /// offset and may sort before a record of the same batch.
    pub async fn commit(&self, records: &[SourceRecord]) -> Result<(), TaskError> {
        let Some(last) = records.iter().rev().find(|r| !r.is_notification()) else {
            return Ok(());
        };
        self.offsets
            .commit(&last.source_partition, &last.source_offset)
            .await?;
        debug!(position = %last.source_offset.position, "Committed offset");
        Ok(())
    }

    /// Stops streaming and releases every resource.
    ///
    /// Runs every step even when one fails, works after a failed or partial
    /// start and does nothing on a task that is already stopped.
    pub async fn stop(&self) {
        let mut resources = self.resources.lock().await;
        if self.state() == TaskState::Stopped {
            debug!("Task already stopped");
            return;
        }

        info!("Stopping task");
        self.release(&mut resources).await;
        info!("Task stopped");
    }

    async fn release(&self, resources: &mut Resources<S>) {
        self.set_state(TaskState::Stopping);

        if let Some(mut signals) = resources.signals.take() {
            signals.stop().await;
        }
        if let Some(mut coordinator) = resources.coordinator.take() {
            coordinator.stop(resources.shutdown_timeout).await;
        }
        if let Some(queue) = self.queue.read().await.as_ref() {
            queue.close();
        }

        if let Some(mut connections) = resources.connections.take() {
            connections.close().await;
        }

        if let Some(schema) = resources.schema.take() {
            if let Err(e) = schema.close().await {
                error!(error = %e, "Failed to close schema history");
            }
        }

        if let Err(e) = self.offsets.flush().await {
            warn!(error = %e, "Failed to flush offset store");
        }

        self.set_state(TaskState::Stopped);
    }

    fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
