use super::{Signal, SignalChannel};
use crate::topic::TopicNamingStrategy;
use chrono::Utc;
use engine_core::{context::TaskContext, error::QueueError, metrics::Metrics, queue::EventQueue};
use model::{
    core::{identifiers::Partition, offset::Offset, position::Position},
    events::ChangeEvent,
    records::record::{Notification, SourceRecord},
};
use serde_json::{Value, json};
use std::{collections::BTreeMap, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Writes `data.message` to the task log.
pub const LOG_SIGNAL: &str = "log";

const AGGREGATE_TYPE: &str = "Signal";
const STATUS_COMPLETED: &str = "COMPLETED";
const STATUS_SKIPPED: &str = "SKIPPED";
const STATUS_UNSUPPORTED: &str = "UNSUPPORTED";

/// Polls signal channels and answers every signal with a notification record
/// published next to the change events.
pub struct SignalProcessor {
    task_name: String,
    partition: Partition,
    topic: String,
    channels: Vec<Box<dyn SignalChannel>>,
    queue: EventQueue<ChangeEvent>,
    published: watch::Receiver<Option<Offset>>,
    poll_interval: Duration,
    metrics: Metrics,
}

impl SignalProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &TaskContext,
        topics: &dyn TopicNamingStrategy,
        channels: Vec<Box<dyn SignalChannel>>,
        queue: EventQueue<ChangeEvent>,
        published: watch::Receiver<Option<Offset>>,
        poll_interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            task_name: ctx.task_name.clone(),
            partition: ctx.partition.clone(),
            topic: topics.notification_topic(),
            channels,
            queue,
            published,
            poll_interval,
            metrics,
        }
    }

    pub fn start(self) -> SignalHandle {
        let cancel = CancellationToken::new();
        let span = info_span!("signals", task = %self.task_name);

        let loop_cancel = cancel.clone();
        let join = tokio::spawn(self.run(loop_cancel).instrument(span));

        SignalHandle {
            cancel,
            join: Some(join),
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let names: Vec<String> = self.channels.iter().map(|c| c.name().to_string()).collect();
        info!(channels = ?names, "Signal processing started");

        'poll: loop {
            for index in 0..self.channels.len() {
                let channel = self.channels[index].name().to_string();
                let signals = match self.channels[index].read().await {
                    Ok(signals) => signals,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Failed to read signals");
                        continue;
                    }
                };

                for signal in signals {
                    let notification = self.handle(&channel, &signal);
                    if let Err(e) = self.notify(notification, &cancel).await {
                        debug!(error = %e, "Notification not published, leaving signal loop");
                        break 'poll;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        for channel in self.channels.iter_mut() {
            if let Err(e) = channel.close().await {
                warn!(channel = channel.name(), error = %e, "Failed to close signal channel");
            }
        }
        info!("Signal processing stopped");
    }

    fn handle(&self, channel: &str, signal: &Signal) -> Notification {
        self.metrics.increment_signals(1);

        let status = match signal.kind.as_str() {
            LOG_SIGNAL => match signal.data.get("message").and_then(Value::as_str) {
                Some(message) => {
                    info!(signal = %signal.id, channel, "{message}");
                    STATUS_COMPLETED
                }
                None => {
                    warn!(signal = %signal.id, "Log signal without a message");
                    STATUS_SKIPPED
                }
            },
            other => {
                warn!(signal = %signal.id, kind = other, "Unsupported signal");
                STATUS_UNSUPPORTED
            }
        };

        Notification {
            id: signal.id.clone(),
            aggregate_type: AGGREGATE_TYPE.to_string(),
            kind: signal.kind.clone(),
            additional_data: BTreeMap::from([
                ("channel".to_string(), channel.to_string()),
                ("status".to_string(), status.to_string()),
            ]),
        }
    }

    /// Notifications carry the last published offset so they never move the
    /// committed position forward.
    async fn notify(
        &self,
        notification: Notification,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let offset = self
            .published
            .borrow()
            .clone()
            .unwrap_or_else(|| Offset::new(Position::ZERO));

        let record = SourceRecord {
            source_partition: self.partition.clone(),
            source_offset: offset,
            topic: self.topic.clone(),
            key: Some(json!({ "id": notification.id })),
            value: None,
            notification: Some(notification),
            ts: Utc::now(),
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(QueueError::Closed),
            result = self.queue.enqueue(ChangeEvent::new(record)) => result,
        }
    }
}

/// Control handle of a running signal loop.
pub struct SignalHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl SignalHandle {
    /// Stops polling and waits for the loop to close its channels.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "Signal task terminated abnormally");
            }
        }
    }
}
