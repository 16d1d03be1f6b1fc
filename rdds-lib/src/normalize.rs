//! Query validation and canonicalisation.
//!
//! Both responders hand their raw input (an RDAP path segment or a WHOIS
//! query line) to [`QueryNormalizer`], which either produces the lowercase
//! ASCII lookup key plus its zone label or says precisely why it refused.
//!
//! Pipeline, each step short-circuiting:
//!
//! 1. trim, reject empty
//! 2. reject more than [`MAX_QUERY_CHARS`] characters
//! 3. non-ASCII input goes through UTS46 / IDNA2008 to Punycode
//! 4. match the label grammar
//! 5. derive the zone label
//! 6. check the zone against the TLD allow-list

use crate::error::ValidationError;
use crate::protocols::registry::TldAllowList;
use crate::types::{NormalizedDomain, Protocol};
use regex::Regex;
use std::sync::Arc;

/// Longest accepted query, counted in characters before conversion.
pub const MAX_QUERY_CHARS: usize = 68;

lazy_static::lazy_static! {
    /// One to three leading labels, then a 2-63 character alphabetic or A-label TLD.
    static ref DOMAIN_PATTERN: Regex = Regex::new(
        r"^(?:(xn--[a-zA-Z0-9-]{1,63}|[a-zA-Z0-9-]{1,63})\.){1,3}(xn--[a-zA-Z0-9-]{2,63}|[a-zA-Z]{2,63})$"
    )
    .expect("domain pattern is a valid regex");
}

/// Validates raw queries against the served zones.
#[derive(Debug, Clone)]
pub struct QueryNormalizer {
    allow_list: Arc<TldAllowList>,
}

impl QueryNormalizer {
    /// Create a normalizer over a fixed allow-list.
    pub fn new(allow_list: Arc<TldAllowList>) -> Self {
        Self { allow_list }
    }

    /// The allow-list this normalizer checks against.
    pub fn allow_list(&self) -> &TldAllowList {
        &self.allow_list
    }

    /// Turn a raw query into a lookup key.
    ///
    /// # Arguments
    ///
    /// * `raw` - Untrusted input, already URL-decoded for RDAP
    /// * `protocol` - Decides how the zone label is derived
    ///
    /// # Returns
    ///
    /// The canonical lowercase ASCII name and its zone, or the first
    /// validation step that failed.
    pub fn normalize(
        &self,
        raw: &str,
        protocol: Protocol,
    ) -> Result<NormalizedDomain, ValidationError> {
        let name = canonicalize(raw)?;
        let zone = zone_label(&name, protocol);

        if !self.allow_list.contains(&zone) {
            return Err(ValidationError::unsupported_tld(zone));
        }

        Ok(NormalizedDomain { name, zone })
    }
}

/// Steps 1-4: produce the lowercase ASCII form of a syntactically valid name.
pub fn canonicalize(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(ValidationError::TooLong {
            max: MAX_QUERY_CHARS,
        });
    }

    let ascii = if trimmed.is_ascii() {
        trimmed.to_ascii_lowercase()
    } else {
        idna::domain_to_ascii_strict(trimmed).map_err(|_| ValidationError::punycode(trimmed))?
    };

    if !DOMAIN_PATTERN.is_match(&ascii) {
        return Err(ValidationError::invalid_format(ascii));
    }

    Ok(ascii)
}

/// Step 5: the registry suffix a canonical name belongs to.
///
/// RDAP treats the last two labels of a name with more than two labels as
/// its zone (so `example.co.uk` lands in `.co.uk`). WHOIS only ever strips
/// the final label.
pub fn zone_label(name: &str, protocol: Protocol) -> String {
    let labels: Vec<&str> = name.split('.').collect();
    let take = match protocol {
        Protocol::Rdap if labels.len() > 2 => 2,
        _ => 1,
    };
    let suffix = labels[labels.len().saturating_sub(take)..].join(".");
    format!(".{}", suffix)
}
