//! The set of extensions this registrar serves.
//!
//! Built once at startup, either from configuration or from the registrar's
//! pricing table, and shared read-only by both responders for the rest of
//! the process lifetime.

use crate::error::StoreError;
use crate::store::RegistryConnection;
use std::collections::BTreeSet;

/// Served extensions, stored lowercase with a leading dot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TldAllowList {
    tlds: BTreeSet<String>,
}

impl TldAllowList {
    /// Build from raw entries such as `".com"`, `"CO.UK"` or `" net "`.
    ///
    /// Blank entries are skipped and a missing leading dot is added.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tlds = entries
            .into_iter()
            .filter_map(|entry| canonical_tld(entry.as_ref()))
            .collect();
        Self { tlds }
    }

    /// Read the served extensions through a registry connection.
    ///
    /// # Errors
    ///
    /// Propagates the store error when the query fails.
    pub async fn load_from(conn: &mut dyn RegistryConnection) -> Result<Self, StoreError> {
        let entries = conn.fetch_allowed_tlds().await?;
        Ok(Self::new(entries))
    }

    /// Whether a zone label (".com", ".co.uk") is served.
    pub fn contains(&self, zone: &str) -> bool {
        match canonical_tld(zone) {
            Some(zone) => self.tlds.contains(&zone),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tlds.is_empty()
    }

    /// Entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tlds.iter().map(String::as_str)
    }
}

fn canonical_tld(entry: &str) -> Option<String> {
    let entry = entry.trim().trim_start_matches('.');
    if entry.is_empty() {
        None
    } else {
        Some(format!(".{}", entry.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryRegistry;
    use crate::store::ConnectionManager;

    #[test]
    fn test_entries_are_canonicalised() {
        let list = TldAllowList::new([".COM", "net", "  .co.uk ", "", "."]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![".co.uk", ".com", ".net"]);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let list = TldAllowList::new([".com"]);
        assert!(list.contains(".com"));
        assert!(list.contains(".COM"));
        assert!(!list.contains(".net"));
        assert!(!list.contains(""));
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let registry = MemoryRegistry::new();
        registry.set_allowed_tlds([".test", ".example"]);

        let mut conn = registry.connect().await.unwrap();
        let list = TldAllowList::load_from(conn.as_mut()).await.unwrap();
        assert!(list.contains(".test"));
        assert!(list.contains(".example"));
        assert_eq!(list.len(), 2);
    }
}
