//! # RDDS Library
//!
//! The serving core of a registrar's public lookup surface: a WHOIS server
//! (RFC 3912, TCP port 43) and an RDAP server (RFC 7480/7482, HTTP) that
//! answer from the same read-only registry database.
//!
//! ## Request path
//!
//! ```text
//! listener -> RateLimiter -> QueryNormalizer -> DomainLookupService -> responder
//!                                                   |
//!                                             ConnectionPool -> RegistryConnection
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rdds_lib::{
//!     ConfigManager, ConnectionPool, MySqlManager, RdapResponder, RdapServer, Services,
//!     TldAllowList, WhoisResponder, WhoisServer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigManager::new(false).discover_and_load(None)?;
//!     let manager = Arc::new(MySqlManager::new(&config.database));
//!     let pool = ConnectionPool::connect(manager, config.database.pool_size, config.database.checkout_timeout).await?;
//!     let allow_list = TldAllowList::new([".com", ".net"]);
//!     let services = Services::new(&config, allow_list, pool);
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let rdap = RdapServer::bind(&config.rdap, RdapResponder::new(services.clone())).await?;
//!     let whois = WhoisServer::bind(&config.whois, WhoisResponder::new(services)).await?;
//!     tokio::try_join!(rdap.run_until_shutdown(shutdown.clone()), whois.run_until_shutdown(shutdown))?;
//!     Ok(())
//! }
//! ```

pub use config::{
    parse_timeout_string, ConfigManager, DatabaseConfig, LoggingConfig, PolicyConfig,
    RateLimitConfig, RdapConfig, RegistrarProfile, RuntimeConfig, ServerConfig, WhoisConfig,
    CONFIG_ENV_VAR, DEFAULT_CONFIG_PATHS,
};
pub use error::{ConfigError, LookupError, RddsError, StoreError, ValidationError};
pub use limiter::RateLimiter;
pub use lookup::{DomainLookupService, LookupOutcome};
pub use normalize::{canonicalize, zone_label, QueryNormalizer, MAX_QUERY_CHARS};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use protocols::{
    parse_query, RdapReply, RdapResponder, TldAllowList, WhoisQuery, WhoisResponder,
    RDAP_CONFORMANCE, RDAP_CONTENT_TYPE,
};
pub use redact::{ContactField, RedactionPolicy, REDACTED};
pub use server::{RdapServer, WhoisServer};
pub use services::Services;
pub use store::{
    ConnectionManager, MemoryRegistry, MySqlManager, QueryCounts, RegistryConnection,
};
pub use types::{
    ContactRecord, ContactRole, DomainRecord, DomainView, DsRecord, Event, NormalizedDomain,
    Protocol, RoleContacts,
};

// Public modules
pub mod protocols;
pub mod server;
pub mod store;

// Internal modules, reachable through the re-exports above
mod config;
mod error;
mod limiter;
mod lookup;
mod normalize;
mod pool;
mod redact;
mod services;
mod types;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RddsError>;
