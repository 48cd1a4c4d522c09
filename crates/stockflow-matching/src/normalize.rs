// Supplier name normalization
//
// Both engines and the suppliers.name_normalized column apply the exact same
// rules, otherwise the trigram index answers a different question than the
// in-process metric.

/// Business-suffix tokens removed from names before comparison
const SUFFIX_TOKENS: &[&str] = &[
    "inc",
    "llc",
    "ltd",
    "corp",
    "co",
    "gmbh",
    "sa",
    "ag",
    "pty",
    "plc",
    "limited",
    "corporation",
    "company",
    "the",
];

/// Lowercase, strip punctuation, drop business suffixes, collapse whitespace
pub fn normalize_supplier_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    lowered
        .split_whitespace()
        .filter(|token| !SUFFIX_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_suffixes() {
        assert_eq!(
            normalize_supplier_name("Acme Industrial Supply, Inc."),
            "acme industrial supply"
        );
        assert_eq!(
            normalize_supplier_name("The Widget Company Ltd"),
            "widget"
        );
        assert_eq!(normalize_supplier_name("Müller GmbH & Co."), "müller");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            normalize_supplier_name("  Global   Parts\tCorp  "),
            "global parts"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for name in [
            "Acme Industrial Supply, Inc.",
            "the THE The",
            "Brandt & Söhne AG",
            "plain name",
            "",
        ] {
            let once = normalize_supplier_name(name);
            assert_eq!(normalize_supplier_name(&once), once);
        }
    }
}
