//! Person-name plausibility scoring.

use crate::model::normalize_name;

use super::terms::{
    contains_word, FOUNDER_PHRASES, GENERIC_BUSINESS_TERMS, INDUSTRY_TITLES, PERSON_CONTEXT_WORDS,
    PLACEHOLDER_NAMES, TITLE_WORDS,
};
use super::{clamp_score, ScoringConfig, NAME_CEILING};

const W_FORMAT: f64 = 0.25;
const W_GENERIC: f64 = 0.20;
const W_AI: f64 = 0.30;
const W_CONTEXT: f64 = 0.15;
const W_INDUSTRY: f64 = 0.10;

const GENERIC_TERM_PENALTY: f64 = 25.0;
const QUERY_PHRASE_PENALTY: f64 = 25.0;
const QUERY_TOKEN_PENALTY: f64 = 20.0;

/// Inputs for scoring one candidate name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameCandidate<'a> {
    pub name: &'a str,
    /// Snippet the name was found in.
    pub context: Option<&'a str>,
    pub company_name: Option<&'a str>,
    pub query: Option<&'a str>,
    /// Plausibility reported by the AI provider, 0–100.
    pub ai_score: Option<u8>,
    pub role: Option<&'a str>,
}

impl<'a> NameCandidate<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }
}

/// Sub-scores before penalties, each 0–100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameBreakdown {
    pub format: f64,
    pub generic: f64,
    pub ai: f64,
    pub context: f64,
    pub industry: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameScore {
    pub score: u8,
    pub breakdown: NameBreakdown,
    /// Score reaches the discovery threshold.
    pub passes: bool,
}

/// Five weighted steps then penalties, clamped to `[floor, 95]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameScorer {
    config: ScoringConfig,
}

impl NameScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> u8 {
        self.config.name_threshold
    }

    pub fn score(&self, candidate: &NameCandidate<'_>) -> NameScore {
        let normalized = normalize_name(candidate.name);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        let context = candidate.context.map(str::to_lowercase).unwrap_or_default();

        let generic_hits = GENERIC_BUSINESS_TERMS.iter().filter(|t| tokens.contains(t)).count();

        let breakdown = NameBreakdown {
            format: format_score(candidate.name, &tokens),
            generic: (100.0 - 50.0 * generic_hits as f64).max(0.0),
            ai: candidate.ai_score.map(|s| f64::from(s.min(100))).unwrap_or(50.0),
            context: context_score(&context, &normalized),
            industry: industry_score(candidate.role, &context),
            penalty: self.penalty(candidate, &normalized, &tokens, &context, generic_hits),
        };

        let weighted = breakdown.format * W_FORMAT
            + breakdown.generic * W_GENERIC
            + breakdown.ai * W_AI
            + breakdown.context * W_CONTEXT
            + breakdown.industry * W_INDUSTRY;

        let score = clamp_score(weighted - breakdown.penalty, self.config.name_floor.min(NAME_CEILING), NAME_CEILING);
        NameScore {
            score,
            breakdown,
            passes: score >= self.config.name_threshold,
        }
    }

    fn penalty(
        &self,
        candidate: &NameCandidate<'_>,
        normalized: &str,
        tokens: &[&str],
        context: &str,
        generic_hits: usize,
    ) -> f64 {
        let mut penalty = GENERIC_TERM_PENALTY * generic_hits as f64;

        if let Some(query) = candidate.query {
            let query = normalize_name(query);
            if !normalized.is_empty() && contains_word(&query, normalized) {
                penalty += QUERY_PHRASE_PENALTY;
            } else {
                let query_terms: Vec<&str> = query.split(' ').collect();
                if tokens.iter().any(|t| t.len() > 2 && query_terms.contains(t)) {
                    penalty += QUERY_TOKEN_PENALTY;
                }
            }
        }

        if let Some(company) = candidate.company_name {
            let company = normalize_name(company);
            let company_terms: Vec<&str> = company.split(' ').collect();
            let overlaps = tokens.iter().any(|t| t.len() > 2 && company_terms.contains(t));
            let role = candidate.role.map(str::to_lowercase).unwrap_or_default();
            let founder = FOUNDER_PHRASES
                .iter()
                .any(|p| contains_word(context, p) || contains_word(&role, p));
            if overlaps && !founder {
                penalty += f64::from(self.config.company_name_penalty);
            }
        }

        penalty
    }
}

/// Placeholder names are dropped before scoring.
pub fn is_placeholder_name(name: &str) -> bool {
    let normalized = normalize_name(name);
    normalized.is_empty() || PLACEHOLDER_NAMES.contains(&normalized.as_str())
}

fn format_score(raw: &str, tokens: &[&str]) -> f64 {
    if raw.chars().any(|c| c.is_ascii_digit() || c == '@' || c == '_') {
        return 0.0;
    }
    let mut score: f64 = match tokens.len() {
        0 => return 0.0,
        1 => 30.0,
        2 | 3 => 100.0,
        4 => 70.0,
        _ => 30.0,
    };
    let capitalized = raw
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .all(|w| w.chars().find(|c| c.is_alphabetic()).is_some_and(char::is_uppercase));
    if !capitalized {
        score -= 20.0;
    }
    if tokens.iter().any(|t| TITLE_WORDS.contains(t)) {
        score -= 30.0;
    }
    if tokens.iter().any(|t| t.chars().count() > 20) {
        score -= 30.0;
    }
    score.max(0.0)
}

fn context_score(context: &str, normalized_name: &str) -> f64 {
    if context.is_empty() {
        return 50.0;
    }
    let hits = PERSON_CONTEXT_WORDS.iter().filter(|w| contains_word(context, w)).count();
    let mut score = 50.0 + 10.0 * hits.min(4) as f64;
    if !normalized_name.is_empty() && normalize_name(context).contains(normalized_name) {
        score += 10.0;
    }
    score.min(100.0)
}

fn industry_score(role: Option<&str>, context: &str) -> f64 {
    let matches = |s: &str| INDUSTRY_TITLES.iter().any(|t| contains_word(s, t));
    match role.map(str::to_lowercase) {
        Some(role) if matches(&role) => 100.0,
        Some(_) => 50.0,
        None if matches(context) => 70.0,
        None => 30.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scorer() -> NameScorer {
        NameScorer::default()
    }

    #[test]
    fn plausible_executive_passes() {
        let s = scorer().score(&NameCandidate {
            name: "Ada Lovelace",
            context: Some("Ada Lovelace is the co-founder and CEO; previously led engineering for 10 years."),
            company_name: Some("Analytical Engines Ltd"),
            query: Some("fintech startups in london"),
            ai_score: Some(90),
            role: Some("Chief Executive Officer"),
        });
        assert!(s.passes, "{s:?}");
        assert!(s.score <= NAME_CEILING);
    }

    #[test]
    fn business_phrase_is_floored() {
        let s = scorer().score(&NameCandidate {
            name: "Marketing Solutions Group",
            ai_score: Some(10),
            ..NameCandidate::new("")
        });
        assert_eq!(s.score, 20);
        assert!(!s.passes);
    }

    #[test]
    fn query_phrase_costs_more_than_token_overlap() {
        let base = NameCandidate {
            ai_score: Some(80),
            role: Some("Founder"),
            ..NameCandidate::new("Grace Hopper")
        };
        let exact = scorer().score(&NameCandidate {
            query: Some("grace hopper"),
            ..base
        });
        let token = scorer().score(&NameCandidate {
            query: Some("hopper logistics"),
            ..base
        });
        assert_eq!(exact.breakdown.penalty, 25.0);
        assert_eq!(token.breakdown.penalty, 20.0);
    }

    #[test]
    fn company_overlap_is_forgiven_for_founders() {
        let base = NameCandidate {
            company_name: Some("Hopper Freight"),
            ai_score: Some(80),
            ..NameCandidate::new("Grace Hopper")
        };
        let plain = scorer().score(&base);
        let founder = scorer().score(&NameCandidate {
            context: Some("Grace Hopper, founder of Hopper Freight"),
            ..base
        });
        assert_eq!(plain.breakdown.penalty, 20.0);
        assert_eq!(founder.breakdown.penalty, 0.0);
    }

    #[test]
    fn founder_role_forgives_company_overlap_without_context() {
        let s = scorer().score(&NameCandidate {
            company_name: Some("Hopper Freight"),
            ai_score: Some(80),
            role: Some("Co-Founder & CTO"),
            ..NameCandidate::new("Grace Hopper")
        });
        assert_eq!(s.breakdown.penalty, 0.0);

        let engineer = scorer().score(&NameCandidate {
            company_name: Some("Hopper Freight"),
            ai_score: Some(80),
            role: Some("Staff Engineer"),
            ..NameCandidate::new("Grace Hopper")
        });
        assert_eq!(engineer.breakdown.penalty, 20.0);
    }

    #[test]
    fn placeholder_names_are_detected() {
        assert!(is_placeholder_name("Jane Doe"));
        assert!(is_placeholder_name("  JOHN   smith "));
        assert!(is_placeholder_name("Test User"));
        assert!(is_placeholder_name("   "));
        assert!(!is_placeholder_name("Jane Goodall"));
    }

    proptest! {
        #[test]
        fn name_scores_stay_within_bounds(
            name in ".{0,40}",
            context in proptest::option::of(".{0,80}"),
            company in proptest::option::of("[a-zA-Z ]{0,30}"),
            query in proptest::option::of("[a-zA-Z ]{0,30}"),
            ai in proptest::option::of(0u8..=255),
            floor in 0u8..=100,
        ) {
            let scorer = NameScorer::new(ScoringConfig { name_floor: floor, ..Default::default() });
            let s = scorer.score(&NameCandidate {
                name: &name,
                context: context.as_deref(),
                company_name: company.as_deref(),
                query: query.as_deref(),
                ai_score: ai,
                role: None,
            });
            prop_assert!(s.score >= floor.min(NAME_CEILING));
            prop_assert!(s.score <= NAME_CEILING);
        }
    }
}
