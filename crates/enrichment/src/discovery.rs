//! Company and contact discovery for a search job.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use prospector_core::{JobId, UserId};

use crate::error::EnrichmentError;
use crate::model::{normalize_name, Company, Contact};
use crate::providers::{ContactCandidate, DiscoveryProvider};
use crate::request::RoleTier;
use crate::scoring::email;
use crate::scoring::name::{is_placeholder_name, NameCandidate, NameScorer};
use crate::store::TargetStore;

/// Counters for one company's contact discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub added: usize,
    pub duplicates: usize,
    pub placeholders: usize,
    pub below_threshold: usize,
    pub failed_tiers: usize,
}

pub struct ContactDiscovery {
    provider: Arc<dyn DiscoveryProvider>,
    store: Arc<dyn TargetStore>,
    scorer: NameScorer,
}

impl ContactDiscovery {
    pub fn new(provider: Arc<dyn DiscoveryProvider>, store: Arc<dyn TargetStore>, scorer: NameScorer) -> Self {
        Self { provider, store, scorer }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Companies for `job_id`; a retried job gets back the ones it already found.
    pub async fn discover_companies(
        &self,
        user_id: UserId,
        job_id: JobId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Company>, EnrichmentError> {
        let existing = self.store.list_companies_by_job(user_id, job_id).await?;
        if !existing.is_empty() {
            tracing::info!(job_id = %job_id, companies = existing.len(), "resuming with stored companies");
            return Ok(existing);
        }

        if !self.provider.is_available() {
            return Err(EnrichmentError::systemic("company discovery provider is unavailable"));
        }
        let candidates = self
            .provider
            .discover_companies(query, limit)
            .await
            .map_err(|e| EnrichmentError::systemic(format!("company discovery failed: {e}")))?;

        let mut seen = HashSet::new();
        let mut companies = Vec::new();
        for candidate in candidates {
            let key = normalize_name(&candidate.name);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            let mut company = Company::new(user_id, Some(job_id), candidate.name.trim());
            company.website = candidate.website.filter(|w| !w.trim().is_empty());
            company.description = candidate.description;
            self.store.insert_company(&company).await?;
            companies.push(company);
            if companies.len() >= limit {
                break;
            }
        }

        if companies.is_empty() {
            return Err(EnrichmentError::systemic("no entities to process"));
        }
        tracing::info!(job_id = %job_id, companies = companies.len(), "companies discovered");
        Ok(companies)
    }

    /// Run every enabled role tier not yet recorded on `company`.
    ///
    /// Provider errors fail only that tier. The tier is recorded on the
    /// company after its contacts are stored.
    pub async fn discover_contacts(
        &self,
        user_id: UserId,
        company: &mut Company,
        tiers: &[RoleTier],
        query: &str,
    ) -> Result<DiscoveryReport, EnrichmentError> {
        let mut report = DiscoveryReport::default();
        let mut seen: HashSet<String> = self
            .store
            .list_contacts(user_id, company.id)
            .await?
            .iter()
            .map(|c| normalize_name(&c.name))
            .collect();

        for tier in tiers {
            if company.completed_searches.contains(tier.tier) {
                continue;
            }

            match self.provider.discover_contacts(company, tier).await {
                Ok(candidates) => {
                    let ranked = self.rank(candidates, company, query, &mut seen, &mut report);
                    for (score, candidate) in ranked {
                        let contact = self.to_contact(user_id, company, candidate, score);
                        self.store.insert_contact(&contact).await?;
                        report.added += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(company = %company.name, tier = %tier.tier, error = %e, "contact discovery tier failed");
                    report.failed_tiers += 1;
                }
            }

            company.completed_searches.record(tier.tier);
            self.store.update_company(company).await?;
        }

        tracing::debug!(company = %company.name, ?report, "contact discovery finished");
        Ok(report)
    }

    /// Drop duplicates and placeholders, score the rest, keep those over the
    /// threshold, best first.
    fn rank(
        &self,
        candidates: Vec<ContactCandidate>,
        company: &Company,
        query: &str,
        seen: &mut HashSet<String>,
        report: &mut DiscoveryReport,
    ) -> Vec<(u8, ContactCandidate)> {
        let mut kept = Vec::new();
        for candidate in candidates {
            if is_placeholder_name(&candidate.name) {
                report.placeholders += 1;
                continue;
            }
            let key = normalize_name(&candidate.name);
            if seen.contains(&key) {
                report.duplicates += 1;
                continue;
            }

            let score = self.scorer.score(&NameCandidate {
                name: &candidate.name,
                context: candidate.context.as_deref(),
                company_name: Some(&company.name),
                query: Some(query),
                ai_score: candidate.ai_score,
                role: candidate.role.as_deref(),
            });
            if !score.passes {
                report.below_threshold += 1;
                continue;
            }
            seen.insert(key);
            kept.push((score.score, candidate));
        }
        kept.sort_by(|a, b| b.0.cmp(&a.0));
        kept
    }

    fn to_contact(&self, user_id: UserId, company: &Company, candidate: ContactCandidate, score: u8) -> Contact {
        let mut contact = Contact::new(user_id, Some(company.id), candidate.name.trim())
            .with_role(candidate.role.filter(|r| !r.trim().is_empty()))
            .with_probability(score);
        // Unverified until a waterfall tier confirms it.
        if let Some(candidate_email) = candidate.email {
            if email::is_valid_format(&candidate_email) && !email::is_placeholder_email(&candidate_email) {
                contact.add_alternative_email(&candidate_email);
            }
        }
        contact
    }
}
