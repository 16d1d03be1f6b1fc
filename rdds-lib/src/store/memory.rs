//! In-process registry backend.
//!
//! Holds the same four tables the MySQL backend reads, counts every query
//! per table and can be told to fail queries, liveness checks or new
//! connections. All connections opened from one `MemoryRegistry` share its
//! tables and counters.

use super::{BoxedConnection, ConnectionManager, RegistryConnection};
use crate::error::StoreError;
use crate::types::{ContactRecord, DomainRecord, DsRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    domains: HashMap<String, DomainRecord>,
    contacts: HashMap<i64, ContactRecord>,
    statuses: HashMap<i64, Vec<String>>,
    dnssec: HashMap<i64, Vec<DsRecord>>,
    tlds: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    domain: AtomicUsize,
    contact: AtomicUsize,
    contact_ids: AtomicUsize,
    status: AtomicUsize,
    dnssec: AtomicUsize,
    tld: AtomicUsize,
    ping: AtomicUsize,
    connect: AtomicUsize,
}

/// Snapshot of how often each table was queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCounts {
    pub domain_queries: usize,
    pub contact_queries: usize,
    /// Total contact ids requested across all contact queries
    pub contact_ids: usize,
    pub status_queries: usize,
    pub dnssec_queries: usize,
    pub tld_queries: usize,
    pub pings: usize,
    pub connects: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    counters: Counters,
    fail_queries: AtomicBool,
    fail_pings: AtomicBool,
    fail_connects: AtomicBool,
    query_delay_ms: AtomicU64,
    ping_delay_ms: AtomicU64,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory registry. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a domain, keyed by its lowercase name.
    pub fn insert_domain(&self, domain: DomainRecord) {
        let key = domain.name.to_lowercase();
        self.inner.tables().domains.insert(key, domain);
    }

    pub fn insert_contact(&self, contact: ContactRecord) {
        self.inner.tables().contacts.insert(contact.id, contact);
    }

    pub fn set_statuses<I, S>(&self, domain_id: i64, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statuses = statuses.into_iter().map(Into::into).collect();
        self.inner.tables().statuses.insert(domain_id, statuses);
    }

    pub fn add_ds_record(&self, domain_id: i64, record: DsRecord) {
        self.inner
            .tables()
            .dnssec
            .entry(domain_id)
            .or_default()
            .push(record);
    }

    pub fn set_allowed_tlds<I, S>(&self, tlds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.tables().tlds = tlds.into_iter().map(Into::into).collect();
    }

    /// Make every data query fail until switched off.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make liveness checks fail until switched off.
    pub fn fail_pings(&self, fail: bool) {
        self.inner.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Make new connections fail until switched off.
    pub fn fail_connects(&self, fail: bool) {
        self.inner.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Delay every data query, to hold connections checked out.
    pub fn set_query_delay(&self, delay: Duration) {
        self.inner
            .query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Slow down liveness checks, e.g. to hold a check-in mid-flight.
    pub fn set_ping_delay(&self, delay: Duration) {
        self.inner
            .ping_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn counts(&self) -> QueryCounts {
        let c = &self.inner.counters;
        QueryCounts {
            domain_queries: c.domain.load(Ordering::SeqCst),
            contact_queries: c.contact.load(Ordering::SeqCst),
            contact_ids: c.contact_ids.load(Ordering::SeqCst),
            status_queries: c.status.load(Ordering::SeqCst),
            dnssec_queries: c.dnssec.load(Ordering::SeqCst),
            tld_queries: c.tld.load(Ordering::SeqCst),
            pings: c.ping.load(Ordering::SeqCst),
            connects: c.connect.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counts(&self) {
        let c = &self.inner.counters;
        for counter in [
            &c.domain,
            &c.contact,
            &c.contact_ids,
            &c.status,
            &c.dnssec,
            &c.tld,
            &c.ping,
            &c.connect,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ConnectionManager for MemoryRegistry {
    async fn connect(&self) -> Result<BoxedConnection, StoreError> {
        self.inner.counters.connect.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_connects.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory registry refused connection"));
        }
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// A session on a [`MemoryRegistry`].
#[derive(Debug)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl MemoryConnection {
    async fn begin(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.inner.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected query failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryConnection for MemoryConnection {
    async fn find_domain(&mut self, name: &str) -> Result<Option<DomainRecord>, StoreError> {
        self.begin(&self.inner.counters.domain).await?;
        Ok(self.inner.tables().domains.get(&name.to_lowercase()).cloned())
    }

    async fn fetch_contacts(&mut self, ids: &[i64]) -> Result<Vec<ContactRecord>, StoreError> {
        self.begin(&self.inner.counters.contact).await?;
        self.inner
            .counters
            .contact_ids
            .fetch_add(ids.len(), Ordering::SeqCst);
        let tables = self.inner.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.contacts.get(id).cloned())
            .collect())
    }

    async fn fetch_statuses(&mut self, domain_id: i64) -> Result<Vec<String>, StoreError> {
        self.begin(&self.inner.counters.status).await?;
        Ok(self
            .inner
            .tables()
            .statuses
            .get(&domain_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_dnssec(&mut self, domain_id: i64) -> Result<Vec<DsRecord>, StoreError> {
        self.begin(&self.inner.counters.dnssec).await?;
        Ok(self
            .inner
            .tables()
            .dnssec
            .get(&domain_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_allowed_tlds(&mut self) -> Result<Vec<String>, StoreError> {
        self.begin(&self.inner.counters.tld).await?;
        Ok(self.inner.tables().tlds.clone())
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.inner.counters.ping.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.inner.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("injected ping failure"));
        }
        Ok(())
    }
}
