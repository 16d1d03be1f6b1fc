//! RDAP responder.
//!
//! Drives one request from rate check to a finished JSON document. The
//! responder knows nothing about HTTP framing; the listener in
//! [`crate::server::http`] turns an [`RdapReply`] into a response.

use crate::config::RegistrarProfile;
use crate::error::LookupError;
use crate::lookup::LookupOutcome;
use crate::redact::{ContactField, RedactionPolicy, REDACTED};
use crate::services::Services;
use crate::types::{ContactRecord, ContactRole, DomainView, NormalizedDomain, Protocol};
use serde_json::{json, Value};
use std::net::IpAddr;
use tracing::{debug, error, info};

/// Media type of every RDAP response body.
pub const RDAP_CONTENT_TYPE: &str = "application/rdap+json";

/// Profile identifiers announced in `rdapConformance`.
pub const RDAP_CONFORMANCE: [&str; 5] = [
    "rdap_level_0",
    "icann_rdap_response_profile_0",
    "icann_rdap_response_profile_1",
    "icann_rdap_technical_implementation_guide_0",
    "icann_rdap_technical_implementation_guide_1",
];

const TERMS_OF_SERVICE: [&str; 6] = [
    "Access to RDAP information is provided to assist persons in determining the contents of a domain name registration record in the domain registrar database.",
    "The data in this record is provided by the domain registrar for informational purposes only, and the domain registrar does not guarantee its accuracy. ",
    "This service is intended only for query-based access. You agree that you will use this data only for lawful purposes and that, under no circumstances will you use this data to: (a) allow,",
    "enable, or otherwise support the transmission by e-mail, telephone, or facsimile of mass unsolicited, commercial advertising or solicitations to entities other than the data recipient's own existing customers; or",
    "(b) enable high volume, automated, electronic processes that send queries or data to the systems of Registry Operator, a Registrar, or NIC except as reasonably necessary to register domain names or modify existing registrations.",
    "All rights reserved. The domain registrar reserves the right to modify these terms at any time. By submitting this query, you agree to abide by this policy.",
];

const TRUNCATED: &str = "object truncated due to authorization";

const RATE_LIMITED: &str = "Rate limit exceeded. Please try again later.";
const POOL_FAILURE: &str = "Database failure. Please try again later.";
const DATABASE_FAILURE: &str = "Error connecting to the RDAP database";

/// Status code and JSON body of one RDAP answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RdapReply {
    pub status: u16,
    pub body: Value,
}

impl RdapReply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// The uniform `{errorCode, title, error}` body.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({
                "errorCode": status,
                "title": status_title(status),
                "error": message,
            }),
        }
    }
}

fn status_title(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

/// Builds RDAP documents from the shared services.
#[derive(Clone)]
pub struct RdapResponder {
    services: Services,
}

impl RdapResponder {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Answer `GET /domain/{raw}`.
    ///
    /// # Arguments
    ///
    /// * `remote` - Client address, the rate-limit key
    /// * `raw` - Percent-decoded path segment
    pub async fn domain(&self, remote: IpAddr, raw: &str) -> RdapReply {
        if self.services.limiter.is_rate_limited(Protocol::Rdap, remote) {
            return RdapReply::error(429, RATE_LIMITED);
        }

        let domain = match self.services.normalizer.normalize(raw, Protocol::Rdap) {
            Ok(domain) => domain,
            Err(e) => {
                debug!(remote = %remote, query = raw, reason = %e, "rejected RDAP query");
                return RdapReply::error(400, e.rdap_message());
            }
        };

        match self.services.lookup.lookup(&domain).await {
            Ok(LookupOutcome::Found(view)) => {
                info!(remote = %remote, domain = %domain.name, "FOUND");
                RdapReply::ok(self.domain_object(&domain, &view))
            }
            Ok(LookupOutcome::NotFound) => {
                info!(remote = %remote, domain = %domain.name, "NOT FOUND");
                self.not_found()
            }
            Err(LookupError::PoolExhausted { waited }) => {
                error!(remote = %remote, domain = %domain.name, ?waited, "no database connection available");
                RdapReply::error(500, POOL_FAILURE)
            }
            Err(LookupError::Database(e)) => {
                error!(remote = %remote, domain = %domain.name, error = %e, "database query failed");
                RdapReply::error(503, DATABASE_FAILURE)
            }
        }
    }

    /// Answer `GET /help`.
    pub fn help(&self, remote: IpAddr) -> RdapReply {
        if self.services.limiter.is_rate_limited(Protocol::Rdap, remote) {
            return RdapReply::error(429, RATE_LIMITED);
        }

        let base = self.services.registrar.rdap_base();
        RdapReply::ok(json!({
            "rdapConformance": RDAP_CONFORMANCE,
            "notices": [
                {
                    "title": "RDAP Help",
                    "description": ["domain/XXXX", "help/XXXX"],
                    "links": [
                        link(&format!("{}/help", base), "self", RDAP_CONTENT_TYPE),
                        link(&self.services.registrar.url, "related", RDAP_CONTENT_TYPE),
                    ],
                },
                terms_notice(&self.services.registrar),
            ],
        }))
    }

    /// Any path without a handler. Still counts against the caller's limit.
    pub fn route_miss(&self, remote: IpAddr) -> RdapReply {
        if self.services.limiter.is_rate_limited(Protocol::Rdap, remote) {
            return RdapReply::error(429, RATE_LIMITED);
        }
        RdapReply::error(404, "Endpoint not found")
    }

    /// 404 for a well-formed, served domain with no registration.
    pub fn not_found(&self) -> RdapReply {
        RdapReply {
            status: 404,
            body: json!({
                "rdapConformance": RDAP_CONFORMANCE,
                "errorCode": 404,
                "title": "Not Found",
                "description": ["The requested domain was not found in the RDAP database."],
                "notices": standard_notices(&self.services.registrar),
            }),
        }
    }

    /// The full domain object for a found registration.
    pub fn domain_object(&self, domain: &NormalizedDomain, view: &DomainView) -> Value {
        let registrar = &self.services.registrar;
        let base = registrar.rdap_base();
        let domain_url = format!("{}/domain/{}", base, domain.name);

        let mut entities = vec![registrar_entity(registrar)];
        if !self.services.minimum_data {
            for role in ContactRole::RDAP_ORDER {
                if let Some(contact) = view.contacts.get(role) {
                    entities.push(contact_entity(contact, role, self.services.redaction));
                }
            }
        }

        let nameservers: Vec<Value> = view
            .nameservers
            .iter()
            .map(|ns| nameserver_object(ns, base))
            .collect();

        let mut secure_dns = json!({ "delegationSigned": view.delegation_signed() });
        if view.delegation_signed() {
            secure_dns["dsData"] = json!(view.ds_records);
        }

        json!({
            "rdapConformance": RDAP_CONFORMANCE,
            "objectClassName": "domain",
            "entities": entities,
            "events": view.events(),
            "handle": view.domain.registry_domain_id.clone().unwrap_or_default(),
            "ldhName": domain.name,
            "links": [
                link(&domain_url, "self", RDAP_CONTENT_TYPE),
                link(&domain_url, "related", RDAP_CONTENT_TYPE),
            ],
            "nameservers": nameservers,
            "status": view.statuses_for(Protocol::Rdap),
            "secureDNS": secure_dns,
            "notices": standard_notices(registrar),
        })
    }
}

fn link(target: &str, rel: &str, media_type: &str) -> Value {
    json!({
        "href": target,
        "value": target,
        "rel": rel,
        "type": media_type,
    })
}

fn truncated_remark(description: &str) -> Value {
    json!({
        "title": "Incomplete Data",
        "description": [description],
        "type": TRUNCATED,
    })
}

fn terms_notice(registrar: &RegistrarProfile) -> Value {
    json!({
        "title": "RDAP Terms of Service",
        "description": TERMS_OF_SERVICE,
        "links": [
            link(&format!("{}/help", registrar.rdap_base()), "self", RDAP_CONTENT_TYPE),
            link(&registrar.url, "alternate", "text/html"),
        ],
    })
}

fn standard_notices(registrar: &RegistrarProfile) -> Value {
    json!([
        terms_notice(registrar),
        {
            "description": [
                "This response conforms to the RDAP Operational Profile for gTLD Registries and Registrars version 1.0"
            ],
        },
        {
            "title": "Status Codes",
            "description": ["For more information on domain status codes, please visit https://icann.org/epp"],
            "links": [link("https://icann.org/epp", "glossary", "text/html")],
        },
        {
            "title": "RDDS Inaccuracy Complaint Form",
            "description": ["URL of the ICANN RDDS Inaccuracy Complaint Form: https://icann.org/wicf"],
            "links": [link("https://icann.org/wicf", "help", "text/html")],
        },
    ])
}

fn registrar_entity(registrar: &RegistrarProfile) -> Value {
    let iana = registrar.iana_id.to_string();
    let entity_url = format!("{}/entity/{}", registrar.rdap_base(), iana);

    json!({
        "objectClassName": "entity",
        "handle": iana,
        "publicIds": [{ "identifier": iana, "type": "IANA Registrar ID" }],
        "roles": ["registrar"],
        "vcardArray": [
            "vcard",
            [
                ["version", {}, "text", "4.0"],
                ["fn", {}, "text", registrar.name],
            ],
        ],
        "links": [{
            "href": entity_url,
            "value": entity_url,
            "rel": "self",
            "type": RDAP_CONTENT_TYPE,
            "title": "Registrar Information",
        }],
        "remarks": [truncated_remark(
            "This record contains only a summary. For detailed information, please submit a query specifically for this object."
        )],
        "entities": [{
            "objectClassName": "entity",
            "roles": ["abuse"],
            "status": ["active"],
            "vcardArray": [
                "vcard",
                [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", registrar.name],
                    ["tel", { "type": ["voice"] }, "uri", format!("tel:{}", registrar.abuse_phone)],
                    ["email", {}, "text", registrar.abuse_email],
                ],
            ],
        }],
    })
}

/// jCard entity for one contact role, each field passed through the policy.
fn contact_entity(contact: &ContactRecord, role: ContactRole, policy: RedactionPolicy) -> Value {
    let field = |f: ContactField, value: &str| policy.apply(f, value).to_string();

    let streets: Vec<String> = if policy.redacts(ContactField::Street) {
        vec![REDACTED.to_string()]
    } else {
        contact
            .street
            .iter()
            .filter(|line| !line.trim().is_empty())
            .cloned()
            .collect()
    };

    json!({
        "objectClassName": "entity",
        "handle": field(ContactField::Handle, contact.identifier.as_deref().unwrap_or_default()),
        "roles": [role.rdap_role()],
        "vcardArray": [
            "vcard",
            [
                ["version", {}, "text", "4.0"],
                ["fn", {}, "text", field(ContactField::Name, &contact.name)],
                ["org", {}, "text", field(ContactField::Organization, &contact.org)],
                ["adr", {}, "text", [
                    "",
                    "",
                    streets,
                    field(ContactField::City, &contact.city),
                    field(ContactField::StateProvince, &contact.state_province),
                    field(ContactField::PostalCode, &contact.postal_code),
                    field(ContactField::Country, &contact.country_code.to_uppercase()),
                ]],
                ["tel", { "type": "voice" }, "text", field(ContactField::Voice, &contact.voice)],
                ["tel", { "type": "fax" }, "text", field(ContactField::Fax, &contact.fax)],
                ["email", {}, "text", field(ContactField::Email, &contact.email)],
            ],
        ],
    })
}

fn nameserver_object(name: &str, base: &str) -> Value {
    json!({
        "objectClassName": "nameserver",
        "handle": format!("H{}", name),
        "ldhName": name,
        "links": [link(&format!("{}/nameserver/{}", base, name), "self", RDAP_CONTENT_TYPE)],
        "remarks": [truncated_remark(
            "This record contains only a brief summary. To access the full details, please initiate a specific query targeting this entity."
        )],
    })
}
