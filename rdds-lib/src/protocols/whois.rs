//! WHOIS responder.
//!
//! Turns one query line into one plain-text reply. Framing, timeouts and
//! closing the socket belong to [`crate::server::tcp`].

use crate::error::LookupError;
use crate::lookup::LookupOutcome;
use crate::redact::{WHOIS_REDACTED_EMAIL, REDACTED};
use crate::services::Services;
use crate::types::{format_seconds, ContactRecord, ContactRole, DomainView, NormalizedDomain, Protocol};
use crate::types::DATE_FORMAT_MILLIS;
use std::fmt::Write as _;
use std::net::IpAddr;
use tracing::{debug, error, info};

pub const RATE_LIMITED: &str = "rate limit exceeded. Please try again later";
pub const NOT_FOUND: &str = "NOT FOUND";
pub const UNKNOWN_QUERY: &str = "Error";
pub const DATABASE_FAILURE: &str = "Error connecting to the whois database";

const TERMS_OF_USE: [&str; 15] = [
    "Terms of Use: Access to WHOIS information is provided by the Registrar to help",
    "individuals determine details of a domain name registration record",
    "in the Registrar's WHOIS database. This record's data is for",
    "informational purposes only, and the Registrar makes no guarantees",
    "regarding its accuracy. This service is designed for query-based",
    "access only. You commit to using this data exclusively for lawful",
    "reasons and agree that you will not: (a) facilitate, allow, or",
    "otherwise support mass unsolicited, commercial promotions via email,",
    "telephone, or fax directed at anyone other than your current clients;",
    "or (b) enable automated, high-volume electronic processes that submit",
    "queries or data to the Registrar's systems or any related NIC, barring",
    "actions needed to register or adjust domain names.",
    "All rights reserved. The Registrar retains the right to adjust these",
    "terms at any time. By accessing this WHOIS service, you concur with",
    "this policy.",
];

/// A parsed query line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhoisQuery<'a> {
    /// `domain <name>`, `domain:<name>` or a bare name
    Domain(&'a str),
    Unknown,
}

/// Classify a query line.
///
/// The `domain` keyword is case-insensitive and may be followed by a space
/// or a colon. A single token with no keyword is also a domain query. An
/// empty payload after the keyword is still a domain query, so the
/// normalizer can report it.
pub fn parse_query(line: &str) -> WhoisQuery<'_> {
    let line = line.trim();

    if let Some(keyword) = line.get(..6) {
        if keyword.eq_ignore_ascii_case("domain") {
            let rest = &line[6..];
            if rest.is_empty() {
                return WhoisQuery::Domain("");
            }
            if let Some(name) = rest.strip_prefix(':') {
                return single_token(name.trim());
            }
            if rest.starts_with(char::is_whitespace) {
                return single_token(rest.trim());
            }
        }
    }

    if line.contains(':') {
        return WhoisQuery::Unknown;
    }
    single_token(line)
}

fn single_token(payload: &str) -> WhoisQuery<'_> {
    if payload.split_whitespace().nth(1).is_some() {
        WhoisQuery::Unknown
    } else {
        WhoisQuery::Domain(payload)
    }
}

/// Answers WHOIS queries from the shared services.
#[derive(Clone)]
pub struct WhoisResponder {
    services: Services,
}

impl WhoisResponder {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Produce the full reply for one query line.
    pub async fn respond(&self, remote: IpAddr, line: &str) -> String {
        if self.services.limiter.is_rate_limited(Protocol::Whois, remote) {
            return RATE_LIMITED.to_string();
        }

        let raw = match parse_query(line) {
            WhoisQuery::Domain(raw) => raw,
            WhoisQuery::Unknown => {
                debug!(remote = %remote, "unknown WHOIS query type");
                return UNKNOWN_QUERY.to_string();
            }
        };

        let domain = match self.services.normalizer.normalize(raw, Protocol::Whois) {
            Ok(domain) => domain,
            Err(e) => {
                debug!(remote = %remote, query = raw, reason = %e, "rejected WHOIS query");
                return e.whois_message().to_string();
            }
        };

        match self.services.lookup.lookup(&domain).await {
            Ok(LookupOutcome::Found(view)) => {
                info!(remote = %remote, domain = %domain.name, "FOUND");
                self.format_domain(&domain, &view)
            }
            Ok(LookupOutcome::NotFound) => {
                info!(remote = %remote, domain = %domain.name, "NOT FOUND");
                NOT_FOUND.to_string()
            }
            Err(LookupError::PoolExhausted { waited }) => {
                error!(remote = %remote, domain = %domain.name, ?waited, "no database connection available");
                DATABASE_FAILURE.to_string()
            }
            Err(LookupError::Database(e)) => {
                error!(remote = %remote, domain = %domain.name, error = %e, "database query failed");
                DATABASE_FAILURE.to_string()
            }
        }
    }

    /// Render the record block for a found domain.
    pub fn format_domain(&self, domain: &NormalizedDomain, view: &DomainView) -> String {
        let registrar = &self.services.registrar;
        let record = &view.domain;
        let date = |ts: &Option<chrono::NaiveDateTime>| ts.as_ref().map(format_seconds).unwrap_or_default();

        let mut lines: Vec<String> = Vec::with_capacity(96);
        lines.push(format!("Domain Name: {}", domain.name.to_uppercase()));
        if domain.is_internationalized() {
            if let Some(unicode) = domain.unicode_name() {
                lines.push(format!("Internationalized Domain Name: {}", unicode.to_uppercase()));
            }
        }

        lines.push(format!(
            "Registry Domain ID: {}",
            record.registry_domain_id.as_deref().unwrap_or_default()
        ));
        lines.push(format!("Registrar WHOIS Server: {}", registrar.whois_server));
        lines.push(format!("Registrar URL: {}", registrar.url));
        lines.push(format!("Updated Date: {}", date(&record.updated)));
        lines.push(format!("Creation Date: {}", date(&record.created)));
        lines.push(format!("Registrar Registration Expiration Date: {}", date(&record.expires)));
        lines.push(format!("Registrar: {}", registrar.name));
        lines.push(format!("Registrar IANA ID: {}", registrar.iana_id));
        lines.push(format!("Registrar Abuse Contact Email: {}", registrar.abuse_email));
        lines.push(format!("Registrar Abuse Contact Phone: {}", registrar.abuse_phone));
        lines.push(format!("Reseller: {}", record.reseller.as_deref().unwrap_or_default()));
        lines.push(format!("Reseller URL: {}", record.reseller_url.as_deref().unwrap_or_default()));

        for status in view.statuses_for(Protocol::Whois) {
            lines.push(format!("Domain Status: {} https://icann.org/epp#{}", status, status));
        }

        for role in ContactRole::WHOIS_ORDER {
            if self.services.redaction.is_active() {
                redacted_block(&mut lines, role);
            } else {
                contact_block(&mut lines, role, view.contacts.get(role));
            }
        }

        for ns in &view.nameservers {
            lines.push(format!("Name Server: {}", ns));
        }

        lines.push(format!(
            "DNSSEC: {}",
            if view.delegation_signed() { "signedDelegation" } else { "unsigned" }
        ));
        lines.push("URL of the ICANN Whois Inaccuracy Complaint Form: https://www.icann.org/wicf/".to_string());
        lines.push(format!(
            ">>> Last update of WHOIS database: {} <<<",
            view.queried_at.format(DATE_FORMAT_MILLIS)
        ));
        lines.push(String::new());
        lines.push("For more information on Whois status codes, please visit https://icann.org/epp".to_string());
        lines.push(String::new());

        let mut out = lines.join("\n");
        out.push('\n');
        for line in TERMS_OF_USE {
            let _ = writeln!(out, "{}", line);
        }
        out
    }
}

fn contact_block(lines: &mut Vec<String>, role: ContactRole, contact: Option<&ContactRecord>) {
    let label = role.whois_label();
    let empty = ContactRecord::default();
    let c = contact.unwrap_or(&empty);

    lines.push(format!(
        "Registry {} ID: {}",
        label,
        c.identifier.as_deref().unwrap_or_default()
    ));
    lines.push(format!("{} Name: {}", label, c.name));
    lines.push(format!("{} Organization: {}", label, c.org));
    for street in &c.street {
        lines.push(format!("{} Street: {}", label, street));
    }
    lines.push(format!("{} City: {}", label, c.city));
    lines.push(format!("{} State/Province: {}", label, c.state_province));
    lines.push(format!("{} Postal Code: {}", label, c.postal_code));
    lines.push(format!("{} Country: {}", label, c.country_code.to_uppercase()));
    lines.push(format!("{} Phone: {}", label, c.voice));
    lines.push(format!("{} Fax: {}", label, c.fax));
    lines.push(format!("{} Email: {}", label, c.email));
}

fn redacted_block(lines: &mut Vec<String>, role: ContactRole) {
    let label = role.whois_label();
    lines.push(format!("Registry {} ID: {}", label, REDACTED));
    for field in [
        "Name",
        "Organization",
        "Street",
        "Street",
        "City",
        "State/Province",
        "Postal Code",
        "Country",
        "Phone",
    ] {
        lines.push(format!("{} {}: {}", label, field, REDACTED));
    }
    lines.push(format!("{} Email: {}", label, WHOIS_REDACTED_EMAIL));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::pool::ConnectionPool;
    use crate::protocols::registry::TldAllowList;
    use crate::store::MemoryRegistry;
    use crate::types::{DomainRecord, DsRecord};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::time::Duration;

    const CONFIG: &str = r#"
[registrar]
name = "Example Registrar"
iana_id = 9999
abuse_email = "abuse@example.net"
abuse_phone = "+1.5555550100"
url = "https://example.net"
whois_server = "whois.example.net"
rdap_url = "https://rdap.example.net"

[policy]
privacy = false
allowed_tlds = [".test"]
"#;

    fn seeded() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.insert_domain(DomainRecord {
            id: 1,
            name: "example.test".to_string(),
            registry_domain_id: Some("D100-TEST".to_string()),
            created: NaiveDate::from_ymd_opt(2021, 6, 1).and_then(|d| d.and_hms_opt(12, 0, 0)),
            nameserver_slots: [
                Some("ns1.example.test".to_string()),
                Some("ns2.example.test".to_string()),
                None,
                None,
                None,
            ],
            registrant: Some(10),
            admin: Some(10),
            tech: Some(10),
            billing: Some(10),
            ..Default::default()
        });
        registry.insert_contact(ContactRecord {
            id: 10,
            identifier: Some("C10".to_string()),
            name: "Jane Holder".to_string(),
            org: "Holder Org".to_string(),
            street: ["1 Main St".to_string(), String::new(), String::new()],
            city: "Springfield".to_string(),
            country_code: "us".to_string(),
            voice: "+1.5555550111".to_string(),
            email: "jane@example.org".to_string(),
            ..Default::default()
        });
        registry.set_statuses(1, ["clientTransferProhibited", "clientDeleteProhibited"]);
        registry
    }

    async fn responder_with(registry: &MemoryRegistry, edit: impl FnOnce(&mut ServerConfig)) -> WhoisResponder {
        let mut config = ServerConfig::from_toml_str(CONFIG).unwrap();
        edit(&mut config);
        let pool = ConnectionPool::connect(Arc::new(registry.clone()), 2, Duration::from_millis(200))
            .await
            .unwrap();
        let allow = TldAllowList::new(config.policy.allowed_tlds.clone().unwrap_or_default());
        WhoisResponder::new(Services::new(&config, allow, pool))
    }

    fn remote() -> IpAddr {
        "198.51.100.7".parse().unwrap()
    }

    #[test]
    fn test_parse_query_forms() {
        assert_eq!(parse_query("domain example.test"), WhoisQuery::Domain("example.test"));
        assert_eq!(parse_query("DOMAIN:example.test\r\n"), WhoisQuery::Domain("example.test"));
        assert_eq!(parse_query("Domain: example.test"), WhoisQuery::Domain("example.test"));
        assert_eq!(parse_query("example.test"), WhoisQuery::Domain("example.test"));
        assert_eq!(parse_query("domain"), WhoisQuery::Domain(""));
        assert_eq!(parse_query(""), WhoisQuery::Domain(""));
        assert_eq!(parse_query("nameserver ns1.example.test"), WhoisQuery::Unknown);
        assert_eq!(parse_query("registrar: Example"), WhoisQuery::Unknown);
        assert_eq!(parse_query("domain a.test b.test"), WhoisQuery::Unknown);
    }

    #[test]
    fn test_domain_prefixed_name_is_bare_token() {
        assert_eq!(parse_query("domainexample.test"), WhoisQuery::Domain("domainexample.test"));
    }

    #[tokio::test]
    async fn test_found_block() {
        let registry = seeded();
        let responder = responder_with(&registry, |_| {}).await;
        let reply = responder.respond(remote(), "domain example.test").await;

        assert!(reply.starts_with("Domain Name: EXAMPLE.TEST\nRegistry Domain ID: D100-TEST\n"));
        assert!(reply.contains("\nRegistrar WHOIS Server: whois.example.net\n"));
        assert!(reply.contains("\nCreation Date: 2021-06-01T12:00:00Z\n"));
        assert!(reply.contains("\nUpdated Date: \n"));
        assert!(reply.contains(
            "\nDomain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited\n"
        ));
        assert_eq!(reply.matches("Registrant Name: Jane Holder").count(), 1);
        assert!(reply.contains("\nRegistrant Country: US\n"));
        assert!(reply.contains("\nName Server: ns1.example.test\nName Server: ns2.example.test\nDNSSEC: unsigned\n"));
        assert!(reply.contains(">>> Last update of WHOIS database: "));
        assert!(reply.ends_with("this policy.\n"));
    }

    #[tokio::test]
    async fn test_contact_block_order() {
        let registry = seeded();
        let responder = responder_with(&registry, |_| {}).await;
        let reply = responder.respond(remote(), "example.test").await;

        let position = |label: &str| reply.find(&format!("Registry {} ID:", label)).unwrap();
        assert!(position("Registrant") < position("Admin"));
        assert!(position("Admin") < position("Billing"));
        assert!(position("Billing") < position("Tech"));
    }

    #[tokio::test]
    async fn test_privacy_replaces_whole_blocks() {
        let registry = seeded();
        let responder = responder_with(&registry, |c| c.policy.privacy = true).await;
        let reply = responder.respond(remote(), "example.test").await;

        for secret in ["Jane Holder", "Holder Org", "1 Main St", "Springfield", "+1.5555550111", "jane@example.org", "C10"] {
            assert!(!reply.contains(secret), "{} leaked", secret);
        }
        assert!(reply.contains("\nRegistry Registrant ID: REDACTED FOR PRIVACY\n"));
        assert_eq!(reply.matches("Tech Street: REDACTED FOR PRIVACY").count(), 2);
        assert!(!reply.contains("Fax:"));
        assert!(reply.contains(&format!("\nAdmin Email: {}\n", WHOIS_REDACTED_EMAIL)));
    }

    #[tokio::test]
    async fn test_default_status_and_signed_delegation() {
        let registry = seeded();
        registry.set_statuses(1, Vec::<String>::new());
        registry.add_ds_record(
            1,
            DsRecord {
                key_tag: 1,
                algorithm: 8,
                digest: "AA".to_string(),
                digest_type: 2,
            },
        );
        let responder = responder_with(&registry, |_| {}).await;
        let reply = responder.respond(remote(), "example.test").await;

        assert!(reply.contains("\nDomain Status: ok https://icann.org/epp#ok\n"));
        assert!(reply.contains("\nDNSSEC: signedDelegation\n"));
    }

    #[tokio::test]
    async fn test_internationalized_name_line() {
        let registry = seeded();
        registry.insert_domain(DomainRecord {
            id: 2,
            name: "xn--mnchen-3ya.test".to_string(),
            ..Default::default()
        });
        let responder = responder_with(&registry, |_| {}).await;
        let reply = responder.respond(remote(), "domain münchen.test").await;

        assert!(reply.starts_with(
            "Domain Name: XN--MNCHEN-3YA.TEST\nInternationalized Domain Name: MÜNCHEN.TEST\n"
        ));
    }

    #[tokio::test]
    async fn test_short_replies() {
        let registry = seeded();
        let responder = responder_with(&registry, |_| {}).await;

        assert_eq!(responder.respond(remote(), "missing.test").await, NOT_FOUND);
        assert_eq!(responder.respond(remote(), "nameserver ns1.example.test").await, UNKNOWN_QUERY);
        assert_eq!(responder.respond(remote(), "domain ").await, "please enter a domain name");
        assert_eq!(responder.respond(remote(), &"a".repeat(69)).await, "domain name is too long");
        assert_eq!(responder.respond(remote(), "bad_name").await, "domain name invalid format");
        assert_eq!(
            responder.respond(remote(), "example.com").await,
            "Invalid TLD. Please search only allowed TLDs"
        );
    }

    #[tokio::test]
    async fn test_single_label_zone_for_whois() {
        let registry = seeded();
        let responder = responder_with(&registry, |c| {
            c.policy.allowed_tlds = Some(vec![".co.uk".to_string()]);
        })
        .await;

        assert_eq!(
            responder.respond(remote(), "example.co.uk").await,
            "Invalid TLD. Please search only allowed TLDs"
        );
    }

    #[tokio::test]
    async fn test_rate_limit_and_database_failure() {
        let registry = seeded();
        let responder = responder_with(&registry, |c| c.rate_limit.limit = 1).await;

        registry.fail_queries(true);
        assert_eq!(responder.respond(remote(), "example.test").await, DATABASE_FAILURE);
        assert_eq!(responder.respond(remote(), "example.test").await, RATE_LIMITED);
    }
}
