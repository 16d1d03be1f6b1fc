//! Process-wide collaborators shared by both responders.
//!
//! Constructed once at startup and cloned into every listener. All members
//! are either immutable or internally synchronised.

use crate::config::{RegistrarProfile, ServerConfig};
use crate::limiter::RateLimiter;
use crate::lookup::DomainLookupService;
use crate::normalize::QueryNormalizer;
use crate::pool::ConnectionPool;
use crate::protocols::registry::TldAllowList;
use crate::redact::RedactionPolicy;
use std::sync::Arc;

#[derive(Clone)]
pub struct Services {
    pub limiter: Arc<RateLimiter>,
    pub normalizer: QueryNormalizer,
    pub lookup: DomainLookupService,
    pub registrar: Arc<RegistrarProfile>,
    pub redaction: RedactionPolicy,

    /// Suppress registrant/admin/tech/billing entities in RDAP
    pub minimum_data: bool,
}

impl Services {
    /// Wire the shared services from configuration, a loaded allow-list and a ready pool.
    pub fn new(config: &ServerConfig, allow_list: TldAllowList, pool: ConnectionPool) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            normalizer: QueryNormalizer::new(Arc::new(allow_list)),
            lookup: DomainLookupService::new(pool),
            registrar: Arc::new(config.registrar.clone()),
            redaction: RedactionPolicy::new(config.policy.privacy),
            minimum_data: config.policy.minimum_data,
        }
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }
}
