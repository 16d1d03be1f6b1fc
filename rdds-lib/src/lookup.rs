//! Domain lookup orchestration.
//!
//! The single read path both responders share. One pooled connection is
//! held for the whole lookup and handed back before the result is returned,
//! whatever the outcome.

use crate::error::{LookupError, StoreError};
use crate::pool::ConnectionPool;
use crate::store::RegistryConnection;
use crate::types::{ContactRecord, ContactRole, DomainView, NormalizedDomain, RoleContacts};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of a lookup that reached the database.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Found(Box<DomainView>),
    NotFound,
}

/// Fetches everything needed to render a domain.
///
/// # Example
///
/// ```rust,no_run
/// use rdds_lib::{ConnectionPool, DomainLookupService, MemoryRegistry, NormalizedDomain};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ConnectionPool::connect(Arc::new(MemoryRegistry::new()), 4, Duration::from_secs(5)).await?;
/// let service = DomainLookupService::new(pool);
/// let domain = NormalizedDomain { name: "example.com".into(), zone: ".com".into() };
/// let outcome = service.lookup(&domain).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DomainLookupService {
    pool: ConnectionPool,
}

impl DomainLookupService {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Look up a normalized domain.
    ///
    /// # Returns
    ///
    /// `Found` with the assembled view, or `NotFound` when no domain row
    /// matches. In the latter case no other table is queried.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when no connection frees up in time, `Database` when
    /// any query fails. The connection is checked in on every path.
    pub async fn lookup(&self, domain: &NormalizedDomain) -> Result<LookupOutcome, LookupError> {
        let mut conn = self.pool.checkout().await?;
        let result = fetch_view(&mut *conn, &domain.name).await;
        conn.release().await;
        Ok(result?)
    }
}

async fn fetch_view(
    conn: &mut dyn RegistryConnection,
    name: &str,
) -> Result<LookupOutcome, StoreError> {
    let Some(domain) = conn.find_domain(name).await? else {
        debug!(domain = name, "no domain row");
        return Ok(LookupOutcome::NotFound);
    };

    let mut ids: Vec<i64> = ContactRole::RDAP_ORDER
        .iter()
        .filter_map(|role| domain.contact_id(*role))
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let fetched: HashMap<i64, Arc<ContactRecord>> = if ids.is_empty() {
        HashMap::new()
    } else {
        conn.fetch_contacts(&ids)
            .await?
            .into_iter()
            .map(|contact| (contact.id, Arc::new(contact)))
            .collect()
    };

    let mut contacts = RoleContacts::default();
    for role in ContactRole::RDAP_ORDER {
        let contact = domain
            .contact_id(role)
            .and_then(|id| fetched.get(&id))
            .cloned();
        contacts.set(role, contact);
    }

    let statuses = conn.fetch_statuses(domain.id).await?;
    let ds_records = conn.fetch_dnssec(domain.id).await?;
    let nameservers = domain.nameservers();

    Ok(LookupOutcome::Found(Box::new(DomainView {
        domain,
        contacts,
        statuses,
        nameservers,
        ds_records,
        queried_at: Utc::now(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegistry;
    use crate::types::{DomainRecord, DsRecord};
    use std::time::Duration;

    fn seeded() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.insert_domain(DomainRecord {
            id: 1,
            name: "example.test".to_string(),
            nameserver_slots: [
                Some("ns1.example.test".to_string()),
                None,
                Some("ns2.example.test".to_string()),
                None,
                None,
            ],
            registrant: Some(10),
            admin: Some(10),
            tech: Some(11),
            billing: None,
            ..Default::default()
        });
        registry.insert_contact(ContactRecord {
            id: 10,
            name: "Jane Holder".to_string(),
            ..Default::default()
        });
        registry.insert_contact(ContactRecord {
            id: 11,
            name: "Tom Tech".to_string(),
            ..Default::default()
        });
        registry.set_statuses(1, ["clientTransferProhibited"]);
        registry.add_ds_record(
            1,
            DsRecord {
                key_tag: 12345,
                algorithm: 13,
                digest: "ABCDEF".to_string(),
                digest_type: 2,
            },
        );
        registry
    }

    async fn service(registry: &MemoryRegistry) -> DomainLookupService {
        let pool = ConnectionPool::connect(Arc::new(registry.clone()), 2, Duration::from_millis(200))
            .await
            .unwrap();
        DomainLookupService::new(pool)
    }

    fn key(name: &str) -> NormalizedDomain {
        NormalizedDomain {
            name: name.to_string(),
            zone: ".test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_found_assembles_view() {
        let registry = seeded();
        let service = service(&registry).await;

        let LookupOutcome::Found(view) = service.lookup(&key("example.test")).await.unwrap() else {
            panic!("expected a domain");
        };

        assert_eq!(view.nameservers, vec!["ns1.example.test", "ns2.example.test"]);
        assert_eq!(view.statuses, vec!["clientTransferProhibited"]);
        assert!(view.delegation_signed());
        assert_eq!(
            view.contacts.get(ContactRole::Registrant).map(|c| c.name.as_str()),
            Some("Jane Holder")
        );
        assert_eq!(
            view.contacts.get(ContactRole::Admin).map(|c| c.name.as_str()),
            Some("Jane Holder")
        );
        assert_eq!(
            view.contacts.get(ContactRole::Tech).map(|c| c.name.as_str()),
            Some("Tom Tech")
        );
        assert!(view.contacts.get(ContactRole::Billing).is_none());
    }

    #[tokio::test]
    async fn test_shared_contact_fetched_once() {
        let registry = seeded();
        let service = service(&registry).await;
        registry.reset_counts();

        service.lookup(&key("example.test")).await.unwrap();

        let counts = registry.counts();
        assert_eq!(counts.contact_queries, 1);
        assert_eq!(counts.contact_ids, 2);
    }

    async fn service_view(service: &DomainLookupService) -> Box<DomainView> {
        match service.lookup(&key("example.test")).await.unwrap() {
            LookupOutcome::Found(view) => view,
            LookupOutcome::NotFound => panic!("expected a domain"),
        }
    }

    #[tokio::test]
    async fn test_roles_share_one_record() {
        let registry = seeded();
        let service = service(&registry).await;
        let view = service_view(&service).await;
        assert!(Arc::ptr_eq(
            view.contacts.registrant.as_ref().unwrap(),
            view.contacts.admin.as_ref().unwrap(),
        ));
    }

    #[tokio::test]
    async fn test_not_found_touches_only_domain_table() {
        let registry = seeded();
        let service = service(&registry).await;
        registry.reset_counts();

        let outcome = service.lookup(&key("missing.test")).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::NotFound));

        let counts = registry.counts();
        assert_eq!(counts.domain_queries, 1);
        assert_eq!(counts.contact_queries, 0);
        assert_eq!(counts.status_queries, 0);
        assert_eq!(counts.dnssec_queries, 0);
    }

    #[tokio::test]
    async fn test_database_error_surfaces() {
        let registry = seeded();
        let service = service(&registry).await;
        registry.fail_queries(true);

        let result = service.lookup(&key("example.test")).await;
        assert!(matches!(result, Err(LookupError::Database(_))));
    }

    #[tokio::test]
    async fn test_no_leak_across_outcomes() {
        let registry = seeded();
        let service = service(&registry).await;

        for _ in 0..5 {
            service.lookup(&key("example.test")).await.unwrap();
            service.lookup(&key("missing.test")).await.unwrap();
        }
        registry.fail_queries(true);
        for _ in 0..5 {
            assert!(service.lookup(&key("example.test")).await.is_err());
        }

        let status = service.pool().status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 2);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_reported() {
        let registry = seeded();
        let pool = ConnectionPool::connect(Arc::new(registry.clone()), 1, Duration::from_millis(50))
            .await
            .unwrap();
        let service = DomainLookupService::new(pool.clone());

        let held = pool.checkout().await.unwrap();
        let result = service.lookup(&key("example.test")).await;
        assert!(matches!(result, Err(LookupError::PoolExhausted { .. })));
        held.release().await;
    }
}
