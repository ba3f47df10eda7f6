use engine_core::{metrics::Metrics, queue::EventQueue};
use model::events::ChangeEvent;
use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

struct Inner {
    failure: OnceLock<String>,
    queue: EventQueue<ChangeEvent>,
    metrics: Metrics,
}

/// Routes fatal producer failures to the consumer.
///
/// The first failure marks the task failed and tears the queue down so a
/// blocked `poll` returns with a terminal error. Later failures are only logged.
#[derive(Clone)]
pub struct ErrorHandler {
    inner: Arc<Inner>,
}

impl ErrorHandler {
    pub fn new(queue: EventQueue<ChangeEvent>, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                failure: OnceLock::new(),
                queue,
                metrics,
            }),
        }
    }

    pub fn fail(&self, err: &(dyn std::error::Error + 'static)) {
        let reason = err.to_string();
        self.inner.metrics.increment_failures(1);

        if self.inner.failure.set(reason.clone()).is_err() {
            warn!(error = %reason, "Ignoring failure reported after the task already failed");
            return;
        }

        error!(error = %reason, "Streaming failed, stopping the task");
        self.inner.queue.fail(reason);
    }

    pub fn failure(&self) -> Option<&str> {
        self.inner.failure.get().map(String::as_str)
    }

    pub fn has_failed(&self) -> bool {
        self.inner.failure.get().is_some()
    }
}
