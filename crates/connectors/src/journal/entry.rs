use chrono::{DateTime, Utc};
use model::events::{ColumnDef, Row};
use serde::{Deserialize, Serialize};

/// One line of a change journal.
///
/// Changes carrying a `tx` become visible when the matching `commit` line is
/// read. Changes without one are committed on their own line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalEntry {
    Insert {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx: Option<String>,
        after: Row,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    Update {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<Row>,
        after: Row,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    Delete {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx: Option<String>,
        before: Row,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    Commit {
        tx: String,
    },
    /// Discards every change buffered for `tx`.
    Rollback {
        tx: String,
    },
    /// Structure of `table` from this line on.
    Schema {
        table: String,
        columns: Vec<ColumnDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ddl: Option<String>,
    },
}

impl JournalEntry {
    pub fn insert(table: &str, tx: Option<&str>, after: Row) -> Self {
        JournalEntry::Insert {
            table: table.to_string(),
            tx: tx.map(str::to_string),
            after,
            ts: None,
        }
    }

    pub fn update(table: &str, tx: Option<&str>, before: Option<Row>, after: Row) -> Self {
        JournalEntry::Update {
            table: table.to_string(),
            tx: tx.map(str::to_string),
            before,
            after,
            ts: None,
        }
    }

    pub fn delete(table: &str, tx: Option<&str>, before: Row) -> Self {
        JournalEntry::Delete {
            table: table.to_string(),
            tx: tx.map(str::to_string),
            before,
            ts: None,
        }
    }

    pub fn commit(tx: &str) -> Self {
        JournalEntry::Commit { tx: tx.to_string() }
    }

    pub fn rollback(tx: &str) -> Self {
        JournalEntry::Rollback { tx: tx.to_string() }
    }

    pub fn schema(table: &str, columns: Vec<ColumnDef>) -> Self {
        JournalEntry::Schema {
            table: table.to_string(),
            columns,
            ddl: None,
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            JournalEntry::Insert { tx, .. }
            | JournalEntry::Update { tx, .. }
            | JournalEntry::Delete { tx, .. } => tx.as_deref(),
            JournalEntry::Commit { tx } | JournalEntry::Rollback { tx } => Some(tx),
            JournalEntry::Schema { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_lines() {
        let entry: JournalEntry = serde_json::from_str(
            r#"{"op":"insert","table":"dbo.customers","tx":"t1","after":{"id":1}}"#,
        )
        .unwrap();
        assert_eq!(entry.transaction_id(), Some("t1"));
        assert!(matches!(entry, JournalEntry::Insert { ref after, .. } if after["id"] == json!(1)));

        let commit: JournalEntry = serde_json::from_str(r#"{"op":"commit","tx":"t1"}"#).unwrap();
        assert_eq!(commit, JournalEntry::commit("t1"));

        let rollback: JournalEntry = serde_json::from_str(r#"{"op":"rollback","tx":"t2"}"#).unwrap();
        assert_eq!(rollback, JournalEntry::rollback("t2"));
        assert_eq!(rollback.transaction_id(), Some("t2"));
    }

    #[test]
    fn omits_empty_optionals() {
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        let line = serde_json::to_string(&JournalEntry::insert("dbo.t", None, row)).unwrap();
        assert_eq!(line, r#"{"op":"insert","table":"dbo.t","after":{"id":1}}"#);
    }
}
