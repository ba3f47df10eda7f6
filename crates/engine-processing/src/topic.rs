use model::core::identifiers::TableId;

/// Names the topics records are routed to.
pub trait TopicNamingStrategy: Send + Sync {
    fn data_topic(&self, table: &TableId) -> String;

    fn heartbeat_topic(&self) -> String;

    fn notification_topic(&self) -> String;
}

/// `<prefix>.<schema>.<table>` for data, `__heartbeat.<prefix>` for heartbeats
/// and `__notifications.<prefix>` for notifications.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_`.
#[derive(Debug, Clone)]
pub struct DefaultTopicNaming {
    prefix: String,
}

impl DefaultTopicNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TopicNamingStrategy for DefaultTopicNaming {
    fn data_topic(&self, table: &TableId) -> String {
        sanitize(&format!("{}.{}.{}", self.prefix, table.schema, table.table))
    }

    fn heartbeat_topic(&self) -> String {
        sanitize(&format!("__heartbeat.{}", self.prefix))
    }

    fn notification_topic(&self) -> String {
        sanitize(&format!("__notifications.{}", self.prefix))
    }
}

fn sanitize(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_data_and_heartbeat_topics() {
        let naming = DefaultTopicNaming::new("server1");
        let table = TableId::new("inventory", "dbo", "customers");

        assert_eq!(naming.data_topic(&table), "server1.dbo.customers");
        assert_eq!(naming.heartbeat_topic(), "__heartbeat.server1");
        assert_eq!(naming.notification_topic(), "__notifications.server1");
    }

    #[test]
    fn replaces_invalid_characters() {
        let naming = DefaultTopicNaming::new("srv 1");
        let table = TableId::new("inventory", "dbo", "order$lines");
        assert_eq!(naming.data_topic(&table), "srv_1.dbo.order_lines");
    }
}
