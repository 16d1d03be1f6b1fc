//! Read-only access to the registry database.
//!
//! [`RegistryConnection`] is one checked-out database session; the pool
//! hands these out and the lookup service issues its queries through them.
//! [`ConnectionManager`] knows how to open new sessions and tell whether an
//! existing one is still alive.
//!
//! Two backends ship with the crate:
//!
//! - [`mysql::MySqlManager`] for the registrar's MySQL/MariaDB schema
//! - [`memory::MemoryRegistry`], an in-process registry with query counters
//!   and failure injection

use crate::error::StoreError;
use crate::types::{ContactRecord, DomainRecord, DsRecord};
use async_trait::async_trait;

pub mod memory;
pub mod mysql;

pub use memory::{MemoryRegistry, QueryCounts};
pub use mysql::MySqlManager;

/// A connection as stored in the pool.
pub type BoxedConnection = Box<dyn RegistryConnection>;

/// One database session.
#[async_trait]
pub trait RegistryConnection: Send {
    /// Exact-name match on the domain table.
    async fn find_domain(&mut self, name: &str) -> Result<Option<DomainRecord>, StoreError>;

    /// Contacts with the given ids, in any order. Unknown ids are skipped.
    async fn fetch_contacts(&mut self, ids: &[i64]) -> Result<Vec<ContactRecord>, StoreError>;

    /// Status tags attached to a domain.
    async fn fetch_statuses(&mut self, domain_id: i64) -> Result<Vec<String>, StoreError>;

    /// DS records attached to a domain.
    async fn fetch_dnssec(&mut self, domain_id: i64) -> Result<Vec<DsRecord>, StoreError>;

    /// Extensions the registrar sells, e.g. ".com".
    async fn fetch_allowed_tlds(&mut self) -> Result<Vec<String>, StoreError>;

    /// Cheap round trip proving the session is usable.
    async fn ping(&mut self) -> Result<(), StoreError>;
}

/// Opens sessions for the pool.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<BoxedConnection, StoreError>;

    /// Liveness check run when a session is checked back in.
    async fn is_valid(&self, conn: &mut dyn RegistryConnection) -> bool {
        conn.ping().await.is_ok()
    }
}
