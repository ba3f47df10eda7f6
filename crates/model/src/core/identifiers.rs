use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid table identifier '{0}', expected 'schema.table'")]
pub struct InvalidTableId(pub String);

/// Fully qualified name of a captured table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// The `schema.table` form used by filters and topic names.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Parses `schema.table` in the scope of `database`.
    pub fn parse(database: &str, s: &str) -> Result<Self, InvalidTableId> {
        match s.split_once('.') {
            Some((schema, table))
                if !schema.is_empty() && !table.is_empty() && !table.contains('.') =>
            {
                Ok(Self::new(database, schema, table))
            }
            _ => Err(InvalidTableId(s.to_string())),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for TableId {
    type Err = InvalidTableId;

    /// Accepts `database.schema.table` or `schema.table` (empty database).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [db, schema, table] if parts.iter().all(|p| !p.is_empty()) => {
                Ok(Self::new(*db, *schema, *table))
            }
            [_, _] => Self::parse("", s),
            _ => Err(InvalidTableId(s.to_string())),
        }
    }
}

/// Logical identity of the streamed source instance.
///
/// A task streams exactly one partition; it never changes once resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub server_name: String,
    pub database_name: String,
}

impl Partition {
    pub fn new(server_name: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            database_name: database_name.into(),
        }
    }

    /// Stable key used to persist offsets for this partition.
    pub fn key(&self) -> String {
        format!("server={}:database={}", self.server_name, self.database_name)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_name, self.database_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schema_qualified_names() {
        let id = TableId::parse("inventory", "dbo.customers").unwrap();
        assert_eq!(id.database, "inventory");
        assert_eq!(id.qualified(), "dbo.customers");

        assert!(TableId::parse("inventory", "customers").is_err());
        assert!(TableId::parse("inventory", "a.b.c").is_err());
    }

    #[test]
    fn from_str_accepts_three_part_names() {
        let id: TableId = "inventory.dbo.orders".parse().unwrap();
        assert_eq!(id, TableId::new("inventory", "dbo", "orders"));

        let short: TableId = "dbo.orders".parse().unwrap();
        assert_eq!(short.database, "");
        assert!("orders".parse::<TableId>().is_err());
    }

    #[test]
    fn partition_key_is_stable() {
        let p = Partition::new("server1", "inventory");
        assert_eq!(p.key(), "server=server1:database=inventory");
        assert_eq!(p.to_string(), "server1/inventory");
    }
}
