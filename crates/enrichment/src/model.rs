//! Enrichment targets: the contact and company rows the pipeline works on.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prospector_core::{CompanyId, ContactId, DomainError, Entity, JobId, UserId};

use crate::scoring::email;

/// Identifier of one search tier.
///
/// The email waterfall tiers run in the order of [`TierId::EMAIL_WATERFALL`];
/// the role tiers drive contact discovery for a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierId {
    /// Tier A: AI-analysis provider.
    #[serde(rename = "contact_enrichment")]
    ContactEnrichment,
    /// Tier B: first directory provider.
    #[serde(rename = "apollo_search")]
    ApolloSearch,
    /// Tier C: second directory provider.
    #[serde(rename = "hunter_search")]
    HunterSearch,
    /// Marker: every email tier has been tried without success.
    #[serde(rename = "comprehensive_search")]
    ComprehensiveSearch,
    #[serde(rename = "core_leadership")]
    CoreLeadership,
    #[serde(rename = "department_heads")]
    DepartmentHeads,
    #[serde(rename = "middle_management")]
    MiddleManagement,
    #[serde(rename = "custom_search_1")]
    CustomSearch1,
    #[serde(rename = "custom_search_2")]
    CustomSearch2,
}

impl TierId {
    /// Email tiers in strict priority order.
    pub const EMAIL_WATERFALL: [TierId; 3] =
        [TierId::ContactEnrichment, TierId::ApolloSearch, TierId::HunterSearch];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierId::ContactEnrichment => "contact_enrichment",
            TierId::ApolloSearch => "apollo_search",
            TierId::HunterSearch => "hunter_search",
            TierId::ComprehensiveSearch => "comprehensive_search",
            TierId::CoreLeadership => "core_leadership",
            TierId::DepartmentHeads => "department_heads",
            TierId::MiddleManagement => "middle_management",
            TierId::CustomSearch1 => "custom_search_1",
            TierId::CustomSearch2 => "custom_search_2",
        }
    }

    pub fn is_email_tier(&self) -> bool {
        Self::EMAIL_WATERFALL.contains(self)
    }
}

impl core::fmt::Display for TierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact_enrichment" => Ok(TierId::ContactEnrichment),
            "apollo_search" => Ok(TierId::ApolloSearch),
            "hunter_search" => Ok(TierId::HunterSearch),
            "comprehensive_search" => Ok(TierId::ComprehensiveSearch),
            "core_leadership" => Ok(TierId::CoreLeadership),
            "department_heads" => Ok(TierId::DepartmentHeads),
            "middle_management" => Ok(TierId::MiddleManagement),
            "custom_search_1" => Ok(TierId::CustomSearch1),
            "custom_search_2" => Ok(TierId::CustomSearch2),
            other => Err(DomainError::validation(format!("unknown search tier: {other}"))),
        }
    }
}

/// Ordered, append-only set of tiers already attempted for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedSearches(Vec<TierId>);

impl CompletedSearches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tier: TierId) -> bool {
        self.0.contains(&tier)
    }

    /// Append `tier`; returns `false` when it was already recorded.
    pub fn record(&mut self, tier: TierId) -> bool {
        if self.contains(tier) {
            return false;
        }
        self.0.push(tier);
        true
    }

    pub fn as_slice(&self) -> &[TierId] {
        &self.0
    }

    /// Append every tier of `other` not yet recorded, keeping this set's order first.
    pub fn merge(&mut self, other: &CompletedSearches) {
        for tier in other.as_slice() {
            self.record(*tier);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<TierId> for CompletedSearches {
    fn from_iter<I: IntoIterator<Item = TierId>>(iter: I) -> Self {
        let mut set = Self::new();
        for tier in iter {
            set.record(tier);
        }
        set
    }
}

/// A person at a company whose email the waterfall tries to discover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    pub company_id: Option<CompanyId>,
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub alternative_emails: Vec<String>,
    pub completed_searches: CompletedSearches,
    /// Confidence 0–100.
    pub probability: u8,
    pub verification_source: Option<TierId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(user_id: UserId, company_id: Option<CompanyId>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ContactId::new(),
            user_id,
            company_id,
            name: name.into(),
            role: None,
            email: None,
            alternative_emails: Vec::new(),
            completed_searches: CompletedSearches::new(),
            probability: 0,
            verification_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    pub fn with_probability(mut self, probability: u8) -> Self {
        self.probability = probability.min(100);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Whether the contact already carries a real (non-placeholder) email.
    ///
    /// Once this holds no further email tier may run against the contact.
    pub fn has_usable_email(&self) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| email::is_valid_format(e) && !email::is_placeholder_email(e))
    }

    /// Add an alternative address (case-insensitive set semantics).
    pub fn add_alternative_email(&mut self, candidate: &str) -> bool {
        let candidate = candidate.trim().to_ascii_lowercase();
        if candidate.is_empty()
            || self.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(&candidate))
            || self.alternative_emails.iter().any(|e| e.eq_ignore_ascii_case(&candidate))
        {
            return false;
        }
        self.alternative_emails.push(candidate);
        true
    }

    /// Record a validated discovery from `tier`.
    pub fn record_discovery(&mut self, tier: TierId, value: &str, confidence: u8) {
        let value = value.trim().to_ascii_lowercase();
        self.alternative_emails.retain(|e| !e.eq_ignore_ascii_case(&value));
        self.email = Some(value);
        self.verification_source = Some(tier);
        self.probability = self.probability.max(confidence.min(100));
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fold a concurrently written copy of this contact into the stored one.
    ///
    /// Attempted tiers and alternatives only grow. A usable email already
    /// stored is never replaced, so two waterfalls racing on one contact keep
    /// the first discovery. Identity columns (name, role, company) stay as stored.
    pub fn merge_progress(&mut self, incoming: &Contact) {
        self.completed_searches.merge(&incoming.completed_searches);

        let alternatives = incoming.alternative_emails.iter().chain(incoming.email.as_ref());
        if !self.has_usable_email() && incoming.email.is_some() {
            self.email = incoming.email.clone();
            self.verification_source = incoming.verification_source;
            self.probability = incoming.probability;
            let primary = self.email.clone().unwrap_or_default();
            self.alternative_emails.retain(|e| !e.eq_ignore_ascii_case(&primary));
        } else if !self.has_usable_email() {
            self.probability = incoming.probability;
        }
        for candidate in alternatives {
            self.add_alternative_email(candidate);
        }
        self.updated_at = self.updated_at.max(incoming.updated_at);
    }
}

impl Entity for Contact {
    type Id = ContactId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A company discovered for a search job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub user_id: UserId,
    /// The job that discovered the company; lets a retried job resume.
    pub job_id: Option<JobId>,
    pub name: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub completed_searches: CompletedSearches,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub fn new(user_id: UserId, job_id: Option<JobId>, name: impl Into<String>) -> Self {
        Self {
            id: CompanyId::new(),
            user_id,
            job_id,
            name: name.into(),
            website: None,
            description: None,
            completed_searches: CompletedSearches::new(),
            created_at: Utc::now(),
        }
    }

    /// Bare domain of the company website (`https://www.acme.io/about` → `acme.io`).
    pub fn domain(&self) -> Option<String> {
        let website = self.website.as_deref()?.trim();
        let without_scheme = website
            .strip_prefix("https://")
            .or_else(|| website.strip_prefix("http://"))
            .unwrap_or(website);
        let host = without_scheme.split(['/', '?', '#']).next()?.trim();
        let host = host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase();
        if host.contains('.') { Some(host) } else { None }
    }

    /// Fold a concurrently written copy into the stored company: attempted
    /// tiers only grow and stored details are kept.
    pub fn merge_progress(&mut self, incoming: &Company) {
        self.completed_searches.merge(&incoming.completed_searches);
        if self.website.is_none() {
            self.website = incoming.website.clone();
        }
        if self.description.is_none() {
            self.description = incoming.description.clone();
        }
    }
}

impl Entity for Company {
    type Id = CompanyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Lowercased, whitespace-collapsed form used to de-duplicate names.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_searches_is_an_ordered_set() {
        let mut set = CompletedSearches::new();
        assert!(set.record(TierId::ApolloSearch));
        assert!(set.record(TierId::ContactEnrichment));
        assert!(!set.record(TierId::ApolloSearch));
        assert_eq!(set.as_slice(), &[TierId::ApolloSearch, TierId::ContactEnrichment]);
    }

    #[test]
    fn tier_ids_serialize_to_their_wire_names() {
        let json = serde_json::to_string(&vec![TierId::CustomSearch1, TierId::ComprehensiveSearch]).unwrap();
        assert_eq!(json, r#"["custom_search_1","comprehensive_search"]"#);
        assert_eq!("hunter_search".parse::<TierId>().unwrap(), TierId::HunterSearch);
        assert!("linkedin_search".parse::<TierId>().is_err());
    }

    #[test]
    fn merging_progress_keeps_both_writers_tiers_and_the_first_discovery() {
        let user = UserId::new();
        let base = Contact::new(user, None, "Ada Lovelace").with_probability(40);

        let mut stored = base.clone();
        stored.completed_searches.record(TierId::ContactEnrichment);
        stored.record_discovery(TierId::ContactEnrichment, "ada@acme.io", 70);

        let mut late = base.clone();
        late.completed_searches.record(TierId::ApolloSearch);
        late.record_discovery(TierId::ApolloSearch, "a.lovelace@acme.io", 90);
        late.name = "A. Lovelace".to_string();

        stored.merge_progress(&late);
        assert_eq!(
            stored.completed_searches.as_slice(),
            &[TierId::ContactEnrichment, TierId::ApolloSearch]
        );
        assert_eq!(stored.email.as_deref(), Some("ada@acme.io"));
        assert_eq!(stored.verification_source, Some(TierId::ContactEnrichment));
        assert_eq!(stored.probability, 70);
        assert_eq!(stored.alternative_emails, vec!["a.lovelace@acme.io"]);
        assert_eq!(stored.name, "Ada Lovelace");
    }

    #[test]
    fn merging_progress_fills_a_missing_email() {
        let user = UserId::new();
        let base = Contact::new(user, None, "Grace Hopper").with_email("noreply@navy.mil");

        let mut stored = base.clone();
        stored.completed_searches.record(TierId::ContactEnrichment);

        let mut found = base.clone();
        found.completed_searches.record(TierId::HunterSearch);
        found.record_discovery(TierId::HunterSearch, "grace@navy.mil", 85);

        stored.merge_progress(&found);
        assert_eq!(stored.email.as_deref(), Some("grace@navy.mil"));
        assert_eq!(stored.verification_source, Some(TierId::HunterSearch));
        assert_eq!(stored.probability, 85);
        assert_eq!(stored.completed_searches.len(), 2);
        assert!(stored.alternative_emails.is_empty());
    }

    #[test]
    fn placeholder_email_is_not_usable() {
        let user = UserId::new();
        assert!(!Contact::new(user, None, "Ada Lovelace").with_email("noreply@acme.io").has_usable_email());
        assert!(Contact::new(user, None, "Ada Lovelace").with_email("ada@acme.io").has_usable_email());
    }

    #[test]
    fn alternatives_stay_unique_and_exclude_primary() {
        let mut contact = Contact::new(UserId::new(), None, "Ada Lovelace").with_email("ada@acme.io");
        assert!(!contact.add_alternative_email("ADA@acme.io"));
        assert!(contact.add_alternative_email("a.lovelace@acme.io"));
        assert!(!contact.add_alternative_email("A.Lovelace@acme.io"));
        assert_eq!(contact.alternative_emails, vec!["a.lovelace@acme.io"]);
    }

    #[test]
    fn discovery_promotes_alternative_and_keeps_highest_probability() {
        let mut contact = Contact::new(UserId::new(), None, "Ada Lovelace").with_probability(80);
        contact.add_alternative_email("ada@acme.io");
        contact.record_discovery(TierId::ApolloSearch, "Ada@Acme.io", 60);

        assert_eq!(contact.email.as_deref(), Some("ada@acme.io"));
        assert!(contact.alternative_emails.is_empty());
        assert_eq!(contact.verification_source, Some(TierId::ApolloSearch));
        assert_eq!(contact.probability, 80);
    }

    #[test]
    fn company_domain_strips_scheme_and_www() {
        let mut company = Company::new(UserId::new(), None, "Acme");
        company.website = Some("https://www.Acme.io/about".into());
        assert_eq!(company.domain().as_deref(), Some("acme.io"));

        company.website = Some("localhost".into());
        assert_eq!(company.domain(), None);
    }

    #[test]
    fn normalize_name_collapses_case_and_punctuation() {
        assert_eq!(normalize_name("  Dr.  Ada   LOVELACE, "), "dr ada lovelace");
    }
}
