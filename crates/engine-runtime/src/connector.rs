use crate::error::BoxError;
use engine_config::TaskConfig;
use engine_core::{
    connection::{ConnectionFactory, ConnectionHandle, SourceConnection},
    schema::DatabaseSchema,
};
use engine_processing::{
    reader::ChangeReader,
    signal::{FileSignalChannel, SignalChannel},
    topic::{DefaultTopicNaming, TopicNamingStrategy},
};
use std::sync::Arc;

/// Strategy bundle of one source type.
///
/// The controller asks the connector for every source specific collaborator
/// and drives them through the same lifecycle regardless of the database.
pub trait SourceConnector: Send + Sync + 'static {
    type Connection: SourceConnection;
    type Reader: ChangeReader;

    /// Short connector name reported in every record, e.g. `journal`.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn connection_factory(
        &self,
        config: &TaskConfig,
    ) -> Result<Box<dyn ConnectionFactory<Self::Connection>>, BoxError>;

    fn schema(&self, config: &TaskConfig) -> Result<Arc<dyn DatabaseSchema>, BoxError>;

    /// Builds the reader over the task's connections.
    fn reader(
        &self,
        config: &TaskConfig,
        main: ConnectionHandle<Self::Connection>,
        metadata: ConnectionHandle<Self::Connection>,
    ) -> Result<Self::Reader, BoxError>;

    fn topic_naming(&self, config: &TaskConfig) -> Arc<dyn TopicNamingStrategy> {
        Arc::new(DefaultTopicNaming::new(config.topic_prefix()))
    }

    /// Channels polled for signals; the task runs no signal loop when empty.
    fn signal_channels(&self, config: &TaskConfig) -> Vec<Box<dyn SignalChannel>> {
        config
            .signal_file
            .iter()
            .map(|path| Box::new(FileSignalChannel::new(path)) as Box<dyn SignalChannel>)
            .collect()
    }
}
