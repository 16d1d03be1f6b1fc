//! Protocol responders and the served-zone registry.
//!
//! Both responders run the same pipeline (rate check, normalization, lookup)
//! and differ only in how they render the outcome.

/// RDAP (Registration Data Access Protocol) JSON responses
pub mod rdap;

/// WHOIS plain-text responses
pub mod whois;

/// TLD allow-list
pub mod registry;

pub use rdap::{RdapReply, RdapResponder, RDAP_CONFORMANCE, RDAP_CONTENT_TYPE};
pub use registry::TldAllowList;
pub use whois::{parse_query, WhoisQuery, WhoisResponder};
