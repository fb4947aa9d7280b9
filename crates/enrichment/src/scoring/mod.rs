//! Confidence Scoring Engine.
//!
//! Scores are derived on demand and never persisted on their own. Name
//! scores live in `[floor, 95]`; email scores in `[0, 100]`.

pub mod email;
pub mod name;
mod terms;

pub use email::{EmailAssessment, EmailScorer};
pub use name::{NameCandidate, NameScore, NameScorer};

/// Tunables shared by the scorers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    /// Lowest score a name can receive.
    pub name_floor: u8,
    /// Penalty when a name overlaps the company name without a founder context.
    pub company_name_penalty: u8,
    /// Names scoring below this are dropped during discovery.
    pub name_threshold: u8,
    /// Emails scoring below this are not accepted as discoveries.
    pub email_threshold: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            name_floor: 20,
            company_name_penalty: 20,
            name_threshold: 50,
            email_threshold: 50,
        }
    }
}

/// Upper bound for name scores.
pub const NAME_CEILING: u8 = 95;

pub(crate) fn clamp_score(value: f64, min: u8, max: u8) -> u8 {
    if value.is_nan() {
        return min;
    }
    value.round().clamp(f64::from(min), f64::from(max)) as u8
}
