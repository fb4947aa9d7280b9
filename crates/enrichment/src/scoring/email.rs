//! Email validation and scoring.

use std::sync::LazyLock;

use regex::Regex;

use super::terms::{
    DISPOSABLE_DOMAINS, FREE_MAIL_DOMAINS, PLACEHOLDER_DOMAINS, PLACEHOLDER_LOCAL_PARTS, PLACEHOLDER_TLDS,
};
use super::{clamp_score, ScoringConfig};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9._%+\-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,24}$")
        .expect("email pattern compiles")
});

/// Syntactic check on a lowercased copy of `email`.
pub fn is_valid_format(email: &str) -> bool {
    let email = email.trim().to_ascii_lowercase();
    !email.contains("..") && EMAIL_RE.is_match(&email)
}

/// Placeholder and template addresses that are rejected regardless of score.
pub fn is_placeholder_email(email: &str) -> bool {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.contains(['{', '[', '<', '}', ']', '>']) || domain.contains(['{', '[', '<']) {
        return true;
    }
    if PLACEHOLDER_LOCAL_PARTS.contains(&local) {
        return true;
    }
    let placeholder_domain = PLACEHOLDER_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.strip_suffix(d).is_some_and(|rest| rest.ends_with('.')));
    if placeholder_domain {
        return true;
    }
    PLACEHOLDER_TLDS.iter().any(|tld| domain.ends_with(tld))
}

/// Outcome of scoring one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailAssessment {
    /// 0–100.
    pub score: u8,
    pub format_valid: bool,
    pub placeholder: bool,
    pub accepted: bool,
}

/// Scores discovered addresses: format (0.4), domain plausibility (0.4),
/// local-part quality (0.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailScorer {
    config: ScoringConfig,
}

impl EmailScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> u8 {
        self.config.email_threshold
    }

    /// Assess `email` for a contact called `name` at `expected_domain`.
    pub fn assess(&self, email: &str, expected_domain: Option<&str>, name: Option<&str>) -> EmailAssessment {
        let normalized = email.trim().to_ascii_lowercase();
        let format_valid = is_valid_format(&normalized);
        let placeholder = is_placeholder_email(&normalized);

        let Some((local, domain)) = normalized.rsplit_once('@') else {
            return EmailAssessment {
                score: 0,
                format_valid: false,
                placeholder,
                accepted: false,
            };
        };

        let format = if format_valid { 100.0 } else { 0.0 };
        let domain_score = domain_plausibility(domain, expected_domain);
        let local_score = local_part_quality(local, name);

        let weighted = format * 0.4 + domain_score * 0.4 + local_score * 0.2;
        let score = clamp_score(weighted, 0, 100);
        let accepted = format_valid && !placeholder && domain_score > 0.0 && score >= self.config.email_threshold;

        EmailAssessment {
            score,
            format_valid,
            placeholder,
            accepted,
        }
    }
}

fn domain_plausibility(domain: &str, expected: Option<&str>) -> f64 {
    if DISPOSABLE_DOMAINS.contains(&domain) || PLACEHOLDER_DOMAINS.contains(&domain) {
        return 0.0;
    }
    if let Some(expected) = expected {
        let expected = expected.trim().to_ascii_lowercase();
        if domain == expected || domain.ends_with(&format!(".{expected}")) {
            return 100.0;
        }
    }
    if FREE_MAIL_DOMAINS.contains(&domain) {
        return 40.0;
    }
    70.0
}

fn local_part_quality(local: &str, name: Option<&str>) -> f64 {
    if PLACEHOLDER_LOCAL_PARTS.contains(&local) {
        return 0.0;
    }
    let tokens: Vec<String> = name
        .map(|n| {
            n.split_whitespace()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
                .filter(|t| t.len() > 1)
                .collect()
        })
        .unwrap_or_default();

    let matched = tokens.iter().filter(|t| local.contains(t.as_str())).count();
    let digits = local.chars().filter(char::is_ascii_digit).count();

    let mut score: f64 = match (tokens.is_empty(), matched) {
        (true, _) => 60.0,
        (false, 0) => 40.0,
        (false, 1) => 80.0,
        _ => 100.0,
    };
    if digits > 2 {
        score -= 20.0;
    }
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_check_rejects_malformed_addresses() {
        assert!(is_valid_format("ada.lovelace@acme.io"));
        assert!(is_valid_format("Ada+Sales@Acme.co.uk"));
        assert!(!is_valid_format("ada@localhost"));
        assert!(!is_valid_format("ada..l@acme.io"));
        assert!(!is_valid_format("@acme.io"));
        assert!(!is_valid_format("ada lovelace@acme.io"));
    }

    #[test]
    fn placeholders_are_detected() {
        for email in [
            "noreply@acme.io",
            "no-reply@acme.io",
            "test.user@acme.io",
            "test@acme.io",
            "ada@example.com",
            "ada@example.org",
            "ada@test.com",
            "ada@domain.com",
            "firstname.lastname@acme.io",
            "{first}.{last}@acme.io",
            "info@acme.io",
            "Support@Acme.io",
            "ada@acme.invalid",
            "x@mail.example.com",
            "ada@eu.test.com",
        ] {
            assert!(is_placeholder_email(email), "{email} should be a placeholder");
        }
        assert!(!is_placeholder_email("ada.lovelace@acme.io"));
        // Suffix match stops at a label boundary.
        assert!(!is_placeholder_email("ada@myexample.com"));
    }

    #[test]
    fn placeholder_is_never_accepted_even_with_high_score() {
        let scorer = EmailScorer::default();
        let a = scorer.assess("info@acme.io", Some("acme.io"), Some("Ada Lovelace"));
        assert!(a.format_valid);
        assert!(a.placeholder);
        assert!(!a.accepted);
    }

    #[test]
    fn matching_business_address_scores_high() {
        let scorer = EmailScorer::default();
        let a = scorer.assess("ada.lovelace@acme.io", Some("acme.io"), Some("Ada Lovelace"));
        assert_eq!(a.score, 100);
        assert!(a.accepted);

        let free = scorer.assess("ada.lovelace@gmail.com", Some("acme.io"), Some("Ada Lovelace"));
        assert!(free.score < a.score);
        assert!(free.accepted);
    }

    #[test]
    fn disposable_or_malformed_addresses_are_rejected() {
        let scorer = EmailScorer::default();
        assert!(!scorer.assess("ada@mailinator.com", None, Some("Ada Lovelace")).accepted);
        let garbage = scorer.assess("not an email", None, None);
        assert_eq!(garbage.score, 0);
        assert!(!garbage.accepted);
    }
}
