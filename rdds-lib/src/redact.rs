//! Privacy redaction applied when responses are rendered.
//!
//! Lookups always return the stored contact data; the serializers ask the
//! policy field by field what may be shown. RDAP redacts per field, WHOIS
//! swaps whole contact blocks, both driven by the same policy value.

/// Marker substituted for personal data.
pub const REDACTED: &str = "REDACTED FOR PRIVACY";

/// Email line of a redacted WHOIS contact block.
pub const WHOIS_REDACTED_EMAIL: &str = "Kindly refer to the RDDS server associated with the identified registrar in this output to obtain contact details for the Registrant, Admin, or Tech associated with the queried domain name.";

/// Contact fields a serializer may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    Handle,
    Name,
    Organization,
    Street,
    City,
    StateProvince,
    PostalCode,
    Country,
    Voice,
    Fax,
    Email,
}

impl ContactField {
    pub const ALL: [ContactField; 11] = [
        ContactField::Handle,
        ContactField::Name,
        ContactField::Organization,
        ContactField::Street,
        ContactField::City,
        ContactField::StateProvince,
        ContactField::PostalCode,
        ContactField::Country,
        ContactField::Voice,
        ContactField::Fax,
        ContactField::Email,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionPolicy {
    privacy: bool,
}

impl RedactionPolicy {
    pub fn new(privacy: bool) -> Self {
        Self { privacy }
    }

    pub fn is_active(&self) -> bool {
        self.privacy
    }

    /// Whether a field must be hidden. The opaque handle always stays.
    pub fn redacts(&self, field: ContactField) -> bool {
        self.privacy && field != ContactField::Handle
    }

    /// The value to emit for a field.
    pub fn apply<'a>(&self, field: ContactField, value: &'a str) -> &'a str {
        if self.redacts(field) {
            REDACTED
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_hides_everything_but_handle() {
        let policy = RedactionPolicy::new(true);
        for field in ContactField::ALL {
            let shown = policy.apply(field, "Jane Doe");
            if field == ContactField::Handle {
                assert_eq!(shown, "Jane Doe");
            } else {
                assert_eq!(shown, REDACTED, "{:?} leaked", field);
            }
        }
    }

    #[test]
    fn test_no_privacy_passes_through() {
        let policy = RedactionPolicy::new(false);
        assert!(!policy.is_active());
        for field in ContactField::ALL {
            assert_eq!(policy.apply(field, "value"), "value");
        }
    }
}
