use engine_config::TaskConfig;
use model::core::identifiers::TableId;
use std::collections::HashSet;

/// Include/exclude list of captured tables, matched on `schema.table`
/// ignoring case.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl TableFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().map(|t| normalize(t.as_ref())).collect(),
            exclude: exclude.into_iter().map(|t| normalize(t.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new(&config.table_include_list, &config.table_exclude_list)
    }

    pub fn is_included(&self, table: &TableId) -> bool {
        let name = normalize(&table.qualified());
        if self.exclude.contains(&name) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&name)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableId {
        TableId::parse("inventory", name).unwrap()
    }

    #[test]
    fn empty_filter_captures_everything() {
        assert!(TableFilter::default().is_included(&table("dbo.orders")));
    }

    #[test]
    fn include_list_restricts_capture() {
        let filter = TableFilter::new(["dbo.Customers"], Vec::<String>::new());
        assert!(filter.is_included(&table("dbo.customers")));
        assert!(!filter.is_included(&table("dbo.orders")));
    }

    #[test]
    fn exclude_list_wins() {
        let filter = TableFilter::new(Vec::<String>::new(), ["dbo.audit"]);
        assert!(!filter.is_included(&table("dbo.audit")));
        assert!(filter.is_included(&table("dbo.orders")));
    }
}
