// Candidate scoring shared by both engines
//
// The name similarity itself is engine-specific (trigram vs edit distance);
// everything else — the field weights, the missing-field denominator, the
// confidence buckets — is identical so the engines stay comparable.

use serde::{Deserialize, Serialize};

use stockflow_core::SupplierStub;
use stockflow_storage::SupplierRow;

pub const WEIGHT_NAME: f64 = 0.40;
pub const WEIGHT_EMAIL_DOMAIN: f64 = 0.25;
pub const WEIGHT_WEBSITE_DOMAIN: f64 = 0.20;
pub const WEIGHT_PHONE: f64 = 0.10;
pub const WEIGHT_ADDRESS: f64 = 0.05;

/// A supplier with its combined match score in [0, 1]
#[derive(Debug, Clone)]
pub struct SupplierCandidate {
    pub supplier: SupplierRow,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    /// Auto-link the purchase order to the supplier
    High,
    /// Offer as the suggested match
    Medium,
    /// Listed for manual review
    Low,
    Discard,
}

pub fn bucket(score: f64) -> ConfidenceBucket {
    if score >= 0.85 {
        ConfidenceBucket::High
    } else if score >= 0.70 {
        ConfidenceBucket::Medium
    } else if score >= 0.50 {
        ConfidenceBucket::Low
    } else {
        ConfidenceBucket::Discard
    }
}

/// Weighted combination over whichever fields are present on BOTH sides.
/// Missing fields drop out of the denominator instead of dragging the score
/// toward zero.
pub fn combine(
    name: Option<f64>,
    email_domain: Option<f64>,
    website_domain: Option<f64>,
    phone: Option<f64>,
    address: Option<f64>,
) -> f64 {
    let mut weighted = 0.0;
    let mut denominator = 0.0;
    for (score, weight) in [
        (name, WEIGHT_NAME),
        (email_domain, WEIGHT_EMAIL_DOMAIN),
        (website_domain, WEIGHT_WEBSITE_DOMAIN),
        (phone, WEIGHT_PHONE),
        (address, WEIGHT_ADDRESS),
    ] {
        if let Some(s) = score {
            weighted += s * weight;
            denominator += weight;
        }
    }
    if denominator == 0.0 {
        0.0
    } else {
        (weighted / denominator).clamp(0.0, 1.0)
    }
}

/// Score the non-name signals of a stub against a stored supplier
pub fn secondary_scores(
    stub: &SupplierStub,
    supplier: &SupplierRow,
) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let email = match (
        stub.email.as_deref().and_then(email_domain),
        supplier.contact_email.as_deref().and_then(email_domain),
    ) {
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => None,
    };

    let website = match (
        stub.website.as_deref().map(website_domain),
        supplier.website.as_deref().map(website_domain),
    ) {
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => None,
    };

    let phone = match (
        stub.phone.as_deref().map(phone_tail),
        supplier.contact_phone.as_deref().map(phone_tail),
    ) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
            Some(if a == b { 1.0 } else { 0.0 })
        }
        _ => None,
    };

    let address = match (stub.address.as_deref(), supplier.address.as_deref()) {
        (Some(a), Some(b)) => Some(strsim::normalized_levenshtein(
            &a.to_lowercase(),
            &b.to_lowercase(),
        )),
        _ => None,
    };

    (email, website, phone, address)
}

/// The domain part of an email address
pub fn email_domain(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}

/// A comparable domain from a website URL: scheme, www and path stripped
pub fn website_domain(url: &str) -> String {
    let trimmed = url.trim().to_lowercase();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(&trimmed);
    let host = without_scheme.split('/').next().unwrap_or("");
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Last ten digits of a phone number; enough to ignore country prefixes
pub fn phone_tail(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_at_the_documented_boundaries() {
        assert_eq!(bucket(0.85), ConfidenceBucket::High);
        assert_eq!(bucket(0.84), ConfidenceBucket::Medium);
        assert_eq!(bucket(0.70), ConfidenceBucket::Medium);
        assert_eq!(bucket(0.69), ConfidenceBucket::Low);
        assert_eq!(bucket(0.50), ConfidenceBucket::Low);
        assert_eq!(bucket(0.49), ConfidenceBucket::Discard);
    }

    #[test]
    fn missing_fields_drop_from_the_denominator() {
        // Name-only perfect match still scores 1.0
        assert_eq!(combine(Some(1.0), None, None, None, None), 1.0);
        // Name + email, both perfect
        assert_eq!(combine(Some(1.0), Some(1.0), None, None, None), 1.0);
        // Name perfect, email mismatched: 0.40 / 0.65
        let score = combine(Some(1.0), Some(0.0), None, None, None);
        assert!((score - 0.40 / 0.65).abs() < 1e-9);
        // Nothing present
        assert_eq!(combine(None, None, None, None, None), 0.0);
    }

    #[test]
    fn domain_and_phone_extraction() {
        assert_eq!(
            email_domain("Sales@AcmeIndustrial.com").as_deref(),
            Some("acmeindustrial.com")
        );
        assert_eq!(email_domain("not-an-email"), None);
        assert_eq!(
            website_domain("https://www.acmeindustrial.com/catalog"),
            "acmeindustrial.com"
        );
        assert_eq!(website_domain("acmeindustrial.com"), "acmeindustrial.com");
        assert_eq!(phone_tail("+1 (555) 123-4567"), "5551234567");
        assert_eq!(phone_tail("123"), "123");
    }
}
