//! What a search job asks for.

use serde::{Deserialize, Serialize};

use prospector_core::{DomainError, DomainResult, JobId, UserId};

use crate::model::TierId;

/// Maximum number of free-text custom targets.
pub const MAX_CUSTOM_TARGETS: usize = 2;

const MAX_CUSTOM_TARGET_LEN: usize = 100;

/// Kind of search a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchType {
    /// Companies, their contacts, then the email waterfall.
    #[serde(rename = "companies")]
    Companies,
    /// Companies and contacts only; no email waterfall, never billed.
    #[serde(rename = "contact-only")]
    ContactOnly,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Companies => "companies",
            SearchType::ContactOnly => "contact-only",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "companies" => Ok(SearchType::Companies),
            "contact-only" => Ok(SearchType::ContactOnly),
            other => Err(DomainError::validation(format!("unknown search type: {other}"))),
        }
    }

    pub fn runs_email_waterfall(&self) -> bool {
        matches!(self, SearchType::Companies)
    }
}

/// Which contact-discovery tiers a job enables.
///
/// Unknown keys are rejected when the job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContactSearchConfig {
    pub core_leadership: bool,
    pub department_heads: bool,
    pub middle_management: bool,
    pub custom_targets: Vec<String>,
}

impl Default for ContactSearchConfig {
    fn default() -> Self {
        Self {
            core_leadership: true,
            department_heads: true,
            middle_management: false,
            custom_targets: Vec::new(),
        }
    }
}

/// One contact-discovery tier and what it looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTier {
    pub tier: TierId,
    pub focus: String,
}

impl ContactSearchConfig {
    pub fn validate(&self) -> DomainResult<()> {
        if self.custom_targets.len() > MAX_CUSTOM_TARGETS {
            return Err(DomainError::validation(format!(
                "at most {MAX_CUSTOM_TARGETS} custom targets are allowed"
            )));
        }
        for target in &self.custom_targets {
            let len = target.trim().chars().count();
            if len == 0 || len > MAX_CUSTOM_TARGET_LEN {
                return Err(DomainError::validation(format!(
                    "custom target must be 1..={MAX_CUSTOM_TARGET_LEN} characters"
                )));
            }
        }
        if self.role_tiers().is_empty() {
            return Err(DomainError::validation("at least one contact search tier must be enabled"));
        }
        Ok(())
    }

    /// Enabled role tiers in execution order.
    pub fn role_tiers(&self) -> Vec<RoleTier> {
        let mut tiers = Vec::new();
        if self.core_leadership {
            tiers.push(RoleTier {
                tier: TierId::CoreLeadership,
                focus: "founders, owners and C-level executives".to_string(),
            });
        }
        if self.department_heads {
            tiers.push(RoleTier {
                tier: TierId::DepartmentHeads,
                focus: "department heads and vice presidents".to_string(),
            });
        }
        if self.middle_management {
            tiers.push(RoleTier {
                tier: TierId::MiddleManagement,
                focus: "directors and team managers".to_string(),
            });
        }
        let custom_tiers = [TierId::CustomSearch1, TierId::CustomSearch2];
        for (tier, target) in custom_tiers.into_iter().zip(&self.custom_targets) {
            tiers.push(RoleTier {
                tier,
                focus: target.trim().to_string(),
            });
        }
        tiers
    }
}

/// Everything the pipeline needs to execute one job.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub job_id: JobId,
    pub user_id: UserId,
    pub query: String,
    pub search_type: SearchType,
    pub contact_config: ContactSearchConfig,
}
