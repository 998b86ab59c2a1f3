//! Field normalization for contact fingerprints
//!
//! Provides the normalization rule duplicate matching relies on:
//! - Unicode NFKC normalization
//! - Case folding
//! - Punctuation stripping
//! - Whitespace collapsing
//! - Digit-only phone numbers

use unicode_normalization::UnicodeNormalization;

/// Normalize a name (or any free-text identity field) for matching.
///
/// # Examples
///
/// ```
/// use contact_recon::normalize::normalize_name;
///
/// assert_eq!(normalize_name("  O'Brien,  Anne "), "o brien anne");
/// assert_eq!(normalize_name("ANNE o brien"), "anne o brien");
/// ```
pub fn normalize_name(s: &str) -> String {
    let folded: String = s.nfkc().collect();

    // Replace non-alphanumeric with space, lowercase
    let stripped: String = folded
        .chars()
        .flat_map(|c| {
            let mapped: Vec<char> = if c.is_alphanumeric() {
                c.to_lowercase().collect()
            } else {
                vec![' ']
            };
            mapped
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a phone number to its digits.
///
/// Formatting characters, spaces and the leading `+` are dropped so that
/// `+1 (555) 010-9999` and `15550109999` compare equal. Returns `None` when no
/// digits remain.
pub fn normalize_phone(s: &str) -> Option<String> {
    let digits: String = s
        .nfkc()
        .filter(|c| c.is_ascii_digit())
        .collect();
    (!digits.is_empty()).then_some(digits)
}

/// Normalize an email address: NFKC, trimmed, lowercased.
pub fn normalize_email(s: &str) -> Option<String> {
    let folded: String = s.nfkc().collect::<String>().trim().to_lowercase();
    (!folded.is_empty()).then_some(folded)
}

/// Build the normalized display name from the name parts of a record.
///
/// Falls back to the organization when no personal name is present.
pub fn normalize_display_name(given: &str, family: &str, organization: &str) -> String {
    let personal = normalize_name(&format!("{} {}", given, family));
    if personal.is_empty() {
        normalize_name(organization)
    } else {
        personal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_case_and_punctuation() {
        assert_eq!(normalize_name("Anne-Marie O'Neil"), "anne marie o neil");
        assert_eq!(normalize_name("ANNE MARIE O NEIL"), "anne marie o neil");
    }

    #[test]
    fn test_unicode_normalization() {
        // Full-width characters are converted to ASCII by NFKC
        assert_eq!(normalize_name("Ａｎｎｅ"), "anne");
        // Accented characters are preserved
        assert_eq!(normalize_name("Zoë Åberg"), "zoë åberg");
    }

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(normalize_name("  Anne \t  Smith  "), "anne smith");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("+1 (555) 010-9999").as_deref(),
            Some("15550109999")
        );
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Anne.Smith@Example.COM ").as_deref(),
            Some("anne.smith@example.com")
        );
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn test_display_name_falls_back_to_organization() {
        assert_eq!(normalize_display_name("", "", "Acme, Inc."), "acme inc");
        assert_eq!(normalize_display_name("Anne", "Smith", "Acme"), "anne smith");
    }
}
