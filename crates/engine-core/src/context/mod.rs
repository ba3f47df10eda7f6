use crate::schema::DatabaseSchema;
use model::core::{identifiers::Partition, offset::Offset};
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Everything a running task shares with its stages.
///
/// Built once the starting offset is resolved and cheap to clone.
#[derive(Clone)]
pub struct TaskContext {
    pub task_name: String,
    /// Logging context of the streaming loop, e.g. `streaming`.
    pub context_name: String,
    /// Unique id of this run of the task.
    pub run_id: String,
    pub partition: Partition,
    /// Offset the task resumes after, `None` on a first run.
    pub initial_offset: Option<Offset>,
    pub schema: Arc<dyn DatabaseSchema>,
}

impl TaskContext {
    pub fn new(
        task_name: impl Into<String>,
        partition: Partition,
        initial_offset: Option<Offset>,
        schema: Arc<dyn DatabaseSchema>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            context_name: "streaming".to_string(),
            run_id: Uuid::new_v4().to_string(),
            partition,
            initial_offset,
            schema,
        }
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    pub fn is_restart(&self) -> bool {
        self.initial_offset.is_some()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_name", &self.task_name)
            .field("context_name", &self.context_name)
            .field("run_id", &self.run_id)
            .field("partition", &self.partition)
            .field("initial_offset", &self.initial_offset)
            .finish_non_exhaustive()
    }
}
