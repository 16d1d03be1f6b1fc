//! Error handling for the registrar lookup services.
//!
//! Validation failures and "domain not found" are ordinary outcomes of a
//! query and are modelled as values the responders match on. The remaining
//! types describe infrastructure failures (database, pool, configuration,
//! sockets) that are caught once at the request or connection boundary.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Why a raw query could not be turned into a lookup key.
///
/// Every variant is client-caused. Each one carries the exact text the RDAP
/// and WHOIS responders put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left after trimming
    #[error("empty domain query")]
    Empty,

    /// Longer than the permitted number of characters
    #[error("domain name is longer than {max} characters")]
    TooLong { max: usize },

    /// Unicode input that UTS46 processing rejected
    #[error("punycode conversion failed for '{input}'")]
    PunycodeConversionFailed { input: String },

    /// ASCII form does not match the label grammar
    #[error("domain name '{domain}' has an invalid format")]
    InvalidFormat { domain: String },

    /// Zone label not present in the TLD allow-list
    #[error("zone '{zone}' is not served by this registrar")]
    UnsupportedTld { zone: String },
}

impl ValidationError {
    /// Create a new punycode conversion failure.
    pub fn punycode<I: Into<String>>(input: I) -> Self {
        Self::PunycodeConversionFailed {
            input: input.into(),
        }
    }

    /// Create a new format failure.
    pub fn invalid_format<D: Into<String>>(domain: D) -> Self {
        Self::InvalidFormat {
            domain: domain.into(),
        }
    }

    /// Create a new unsupported TLD failure.
    pub fn unsupported_tld<Z: Into<String>>(zone: Z) -> Self {
        Self::UnsupportedTld { zone: zone.into() }
    }

    /// Message placed in the `error` member of an RDAP 400 body.
    pub fn rdap_message(&self) -> &'static str {
        match self {
            Self::Empty => "Please enter a domain name",
            Self::TooLong { .. } => "Domain name is too long",
            Self::PunycodeConversionFailed { .. } => "Domain conversion to Punycode failed",
            Self::InvalidFormat { .. } => "Domain name invalid format",
            Self::UnsupportedTld { .. } => "Invalid TLD. Please search only allowed TLDs",
        }
    }

    /// Plain-text diagnostic written back to a WHOIS client.
    pub fn whois_message(&self) -> &'static str {
        match self {
            Self::Empty => "please enter a domain name",
            Self::TooLong { .. } => "domain name is too long",
            Self::PunycodeConversionFailed { .. } => "Domain conversion to Punycode failed",
            Self::InvalidFormat { .. } => "domain name invalid format",
            Self::UnsupportedTld { .. } => "Invalid TLD. Please search only allowed TLDs",
        }
    }
}

/// Failure reported by a registry backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database driver returned an error
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A column held a value outside the range the model accepts
    #[error("unexpected value in column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The backend cannot serve queries at all
    #[error("registry backend unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    /// Create a new decode error.
    pub fn decode<C: Into<String>, M: Into<String>>(column: C, message: M) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a new unavailable error.
    pub fn unavailable<M: Into<String>>(message: M) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Infrastructure failure during a domain lookup.
///
/// "Not found" is deliberately absent: it is a successful lookup outcome.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No pooled connection became free within the checkout timeout
    #[error("no database connection available after {waited:?}")]
    PoolExhausted { waited: Duration },

    /// A query against the registry failed
    #[error(transparent)]
    Database(#[from] StoreError),
}

impl LookupError {
    /// Create a new pool exhaustion error.
    pub fn pool_exhausted(waited: Duration) -> Self {
        Self::PoolExhausted { waited }
    }
}

/// Configuration discovery, parsing and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An explicitly named file does not exist
    #[error("configuration file '{path}' not found")]
    NotFound { path: String },

    /// No file was given and none of the standard locations exist
    #[error("no configuration file found (looked in: {searched})")]
    NoConfigFile { searched: String },

    /// The file exists but could not be read
    #[error("failed to read configuration file '{path}': {message}")]
    Read { path: String, message: String },

    /// The file is not valid TOML or does not match the schema
    #[error("failed to parse TOML configuration: {message}")]
    Parse { message: String },

    /// A value parsed but is not acceptable
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    /// Create a new invalid-value error.
    pub fn invalid<M: Into<String>>(message: M) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Top-level error for process bootstrap and listener lifecycles.
#[derive(Debug, Error)]
pub enum RddsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// A listener socket could not be bound
    #[error("failed to bind {service} listener on {addr}: {source}")]
    Bind {
        service: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RddsError {
    /// Create a new bind error.
    pub fn bind(service: &'static str, addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind {
            service,
            addr,
            source,
        }
    }
}
