//! Core data types shared by the lookup service and both responders.
//!
//! Records mirror the registry tables the services read from. `DomainView`
//! is the aggregate a successful lookup produces; both serializers render
//! from it without going back to the database.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Second-precision timestamp format used for stored lifecycle dates.
pub const DATE_FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Millisecond-precision format used for generated timestamps.
pub const DATE_FORMAT_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Which public protocol a query arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rdap,
    Whois,
}

impl Protocol {
    /// Service key used by the rate limiter and in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rdap => "rdap",
            Protocol::Whois => "whois",
        }
    }

    /// Status reported when a domain has no status rows.
    pub fn default_status(&self) -> &'static str {
        match self {
            Protocol::Rdap => "active",
            Protocol::Whois => "ok",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDomain {
    /// Lowercase ASCII (Punycode) form, the registry lookup key
    pub name: String,

    /// Registry suffix with a leading dot, e.g. ".com" or ".co.uk"
    pub zone: String,
}

impl NormalizedDomain {
    /// Whether any label of the name is an IDNA A-label.
    pub fn is_internationalized(&self) -> bool {
        self.name.split('.').any(|label| label.starts_with("xn--"))
    }

    /// Unicode rendering of an internationalized name.
    ///
    /// Returns `None` for plain ASCII names and for A-labels that do not
    /// decode cleanly.
    pub fn unicode_name(&self) -> Option<String> {
        if !self.is_internationalized() {
            return None;
        }
        let (unicode, result) = idna::domain_to_unicode(&self.name);
        result.ok().map(|_| unicode)
    }
}

/// Contact roles a domain references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactRole {
    Registrant,
    Admin,
    Tech,
    Billing,
}

impl ContactRole {
    /// Block order in a WHOIS response.
    pub const WHOIS_ORDER: [ContactRole; 4] = [
        ContactRole::Registrant,
        ContactRole::Admin,
        ContactRole::Billing,
        ContactRole::Tech,
    ];

    /// Entity order in an RDAP domain object.
    pub const RDAP_ORDER: [ContactRole; 4] = [
        ContactRole::Registrant,
        ContactRole::Admin,
        ContactRole::Tech,
        ContactRole::Billing,
    ];

    /// Line prefix in WHOIS output ("Registrant Name:", "Tech Email:", ...).
    pub fn whois_label(&self) -> &'static str {
        match self {
            ContactRole::Registrant => "Registrant",
            ContactRole::Admin => "Admin",
            ContactRole::Tech => "Tech",
            ContactRole::Billing => "Billing",
        }
    }

    /// RDAP entity role name.
    pub fn rdap_role(&self) -> &'static str {
        match self {
            ContactRole::Registrant => "registrant",
            ContactRole::Admin => "administrative",
            ContactRole::Tech => "technical",
            ContactRole::Billing => "billing",
        }
    }
}

/// A row of the domain table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainRecord {
    /// Internal primary key, used to join status and DNSSEC rows
    pub id: i64,

    /// Canonical ASCII name
    pub name: String,

    pub registry_domain_id: Option<String>,

    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub expires: Option<NaiveDateTime>,
    pub transferred: Option<NaiveDateTime>,

    /// Raw ns1..ns5 columns; empty slots are `None`
    pub nameserver_slots: [Option<String>; 5],

    pub registrant: Option<i64>,
    pub admin: Option<i64>,
    pub tech: Option<i64>,
    pub billing: Option<i64>,

    pub reseller: Option<String>,
    pub reseller_url: Option<String>,
}

impl DomainRecord {
    /// Contact id referenced for a role.
    pub fn contact_id(&self, role: ContactRole) -> Option<i64> {
        match role {
            ContactRole::Registrant => self.registrant,
            ContactRole::Admin => self.admin,
            ContactRole::Tech => self.tech,
            ContactRole::Billing => self.billing,
        }
    }

    /// Non-empty nameserver slots in column order.
    pub fn nameservers(&self) -> Vec<String> {
        self.nameserver_slots
            .iter()
            .flatten()
            .map(|ns| ns.trim())
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A row of the contact table.
///
/// NULL text columns are read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: i64,

    /// Registry-facing handle
    pub identifier: Option<String>,

    pub name: String,
    pub org: String,
    pub street: [String; 3],
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country_code: String,
    pub voice: String,
    pub fax: String,
    pub email: String,
}

/// One DS record attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest: String,
    pub digest_type: u8,
}

/// A dated lifecycle event as rendered in RDAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_action: &'static str,
    pub event_date: String,
}

/// Contacts resolved for the four roles.
///
/// A contact referenced by several roles is shared, not duplicated.
#[derive(Debug, Clone, Default)]
pub struct RoleContacts {
    pub registrant: Option<Arc<ContactRecord>>,
    pub admin: Option<Arc<ContactRecord>>,
    pub tech: Option<Arc<ContactRecord>>,
    pub billing: Option<Arc<ContactRecord>>,
}

impl RoleContacts {
    pub fn get(&self, role: ContactRole) -> Option<&ContactRecord> {
        let slot = match role {
            ContactRole::Registrant => &self.registrant,
            ContactRole::Admin => &self.admin,
            ContactRole::Tech => &self.tech,
            ContactRole::Billing => &self.billing,
        };
        slot.as_deref()
    }

    pub(crate) fn set(&mut self, role: ContactRole, contact: Option<Arc<ContactRecord>>) {
        match role {
            ContactRole::Registrant => self.registrant = contact,
            ContactRole::Admin => self.admin = contact,
            ContactRole::Tech => self.tech = contact,
            ContactRole::Billing => self.billing = contact,
        }
    }
}

/// Everything known about a registered domain at query time.
#[derive(Debug, Clone)]
pub struct DomainView {
    pub domain: DomainRecord,
    pub contacts: RoleContacts,

    /// Stored status tags; empty means the protocol default applies
    pub statuses: Vec<String>,

    /// Compacted nameserver hostnames
    pub nameservers: Vec<String>,

    pub ds_records: Vec<DsRecord>,

    /// When the lookup ran; reported as the database update time
    pub queried_at: DateTime<Utc>,
}

impl DomainView {
    /// A domain with DS records is a signed delegation.
    pub fn delegation_signed(&self) -> bool {
        !self.ds_records.is_empty()
    }

    /// Status tags to report, falling back to the protocol default.
    pub fn statuses_for(&self, protocol: Protocol) -> Vec<String> {
        if self.statuses.is_empty() {
            vec![protocol.default_status().to_string()]
        } else {
            self.statuses.clone()
        }
    }

    /// RDAP event list.
    ///
    /// Registration and expiration use second precision; the generated and
    /// optional events carry milliseconds.
    pub fn events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(5);
        if let Some(created) = self.domain.created {
            events.push(Event {
                event_action: "registration",
                event_date: format_seconds(&created),
            });
        }
        if let Some(expires) = self.domain.expires {
            events.push(Event {
                event_action: "expiration",
                event_date: format_seconds(&expires),
            });
        }
        events.push(Event {
            event_action: "last update of RDAP database",
            event_date: self.queried_at.format(DATE_FORMAT_MILLIS).to_string(),
        });
        if let Some(updated) = self.domain.updated {
            events.push(Event {
                event_action: "last changed",
                event_date: format_millis(&updated),
            });
        }
        if let Some(transferred) = self.domain.transferred {
            events.push(Event {
                event_action: "transfer",
                event_date: format_millis(&transferred),
            });
        }
        events
    }
}

/// Format a stored timestamp with second precision.
pub fn format_seconds(ts: &NaiveDateTime) -> String {
    ts.format(DATE_FORMAT_SECONDS).to_string()
}

/// Format a stored timestamp with millisecond precision.
pub fn format_millis(ts: &NaiveDateTime) -> String {
    ts.format(DATE_FORMAT_MILLIS).to_string()
}
