//! End-to-end search a background job executes.
//!
//! Companies → contacts per enabled role tier → (for `companies` searches)
//! the email waterfall with billing, fanned out in bounded batches.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use prospector_core::{CompanyId, ContactId, JobId, UserId};

use crate::billing::{BillingError, BillingGuard, Settlement};
use crate::discovery::ContactDiscovery;
use crate::error::EnrichmentError;
use crate::model::{Company, Contact};
use crate::request::SearchRequest;
use crate::store::TargetStore;
use crate::waterfall::{EnrichmentOutcome, WaterfallOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Contacts enriched concurrently.
    pub batch_size: usize,
    /// Email-less contacts per company sent through the waterfall.
    pub contacts_per_company: usize,
    pub company_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            contacts_per_company: 3,
            company_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    DiscoveringCompanies,
    DiscoveringContacts,
    EnrichingEmails,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchProgress {
    pub phase: SearchPhase,
    pub completed: u32,
    pub total: u32,
}

impl SearchProgress {
    pub fn new(phase: SearchPhase, completed: usize, total: usize) -> Self {
        Self {
            phase,
            completed: u32::try_from(completed).unwrap_or(u32::MAX),
            total: u32::try_from(total).unwrap_or(u32::MAX),
        }
    }
}

/// Receives phase updates while a search runs.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: SearchProgress);
}

pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _progress: SearchProgress) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub id: ContactId,
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub probability: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub id: CompanyId,
    pub name: String,
    pub website: Option<String>,
    pub contacts: Vec<ContactSummary>,
}

/// Per-contact waterfall result recorded in the job results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactOutcome {
    pub contact_id: ContactId,
    pub outcome: EnrichmentOutcome,
    pub settlement: Settlement,
}

/// Payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub companies: Vec<CompanySummary>,
    pub contacts_found: usize,
    pub emails_discovered: usize,
    pub credits_charged: u64,
    pub outcomes: Vec<ContactOutcome>,
    /// Why enrichment ended before every target was tried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_early: Option<String>,
}

impl SearchResults {
    pub fn result_count(&self) -> usize {
        self.contacts_found
    }
}

/// Outcome of a manual single-contact enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleEnrichment {
    pub outcome: EnrichmentOutcome,
    pub settlement: Settlement,
    pub contact: Option<Contact>,
}

pub struct SearchPipeline {
    discovery: ContactDiscovery,
    waterfall: Arc<WaterfallOrchestrator>,
    billing: BillingGuard,
    store: Arc<dyn TargetStore>,
    config: PipelineConfig,
}

impl SearchPipeline {
    pub fn new(
        discovery: ContactDiscovery,
        waterfall: Arc<WaterfallOrchestrator>,
        billing: BillingGuard,
        store: Arc<dyn TargetStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            discovery,
            waterfall,
            billing,
            store,
            config,
        }
    }

    pub fn billing(&self) -> &BillingGuard {
        &self.billing
    }

    #[tracing::instrument(skip_all, fields(job_id = %request.job_id, user_id = %request.user_id))]
    pub async fn run(&self, request: &SearchRequest, progress: &dyn ProgressSink) -> Result<SearchResults, EnrichmentError> {
        request
            .contact_config
            .validate()
            .map_err(|e| EnrichmentError::systemic(e.to_string()))?;

        let enrich = request.search_type.runs_email_waterfall();
        if enrich {
            if !self.waterfall.has_available_tier() {
                return Err(EnrichmentError::systemic("no email provider is available"));
            }
            self.billing.precheck(request.user_id).await?;
        }

        progress.report(SearchProgress::new(SearchPhase::DiscoveringCompanies, 0, 1)).await;
        let mut companies = self
            .discovery
            .discover_companies(request.user_id, request.job_id, &request.query, self.config.company_limit)
            .await?;

        let tiers = request.contact_config.role_tiers();
        let total = companies.len();
        progress.report(SearchProgress::new(SearchPhase::DiscoveringContacts, 0, total)).await;
        for (i, company) in companies.iter_mut().enumerate() {
            self.discovery
                .discover_contacts(request.user_id, company, &tiers, &request.query)
                .await?;
            progress.report(SearchProgress::new(SearchPhase::DiscoveringContacts, i + 1, total)).await;
        }

        let mut outcomes = Vec::new();
        let mut stopped_early = None;
        if enrich {
            let targets = self.enrichment_targets(request.user_id, &companies).await?;
            (outcomes, stopped_early) = self.enrich_batches(request, &targets, progress).await?;
        }

        progress.report(SearchProgress::new(SearchPhase::Finalizing, 0, 1)).await;
        let mut results = self.summarize(request.user_id, &companies, outcomes).await?;
        results.stopped_early = stopped_early;
        tracing::info!(
            contacts = results.contacts_found,
            emails = results.emails_discovered,
            credits = results.credits_charged,
            "search finished"
        );
        Ok(results)
    }

    /// Precheck, waterfall and billing for one existing contact.
    pub async fn enrich_single(&self, user_id: UserId, contact_id: ContactId) -> Result<SingleEnrichment, EnrichmentError> {
        self.billing.precheck(user_id).await?;
        let outcome = self.waterfall.enrich_contact(user_id, contact_id).await?;
        let settlement = self.billing.settle(user_id, None, contact_id, &outcome).await?;
        let contact = self.store.get_contact(user_id, contact_id).await?;
        Ok(SingleEnrichment {
            outcome,
            settlement,
            contact,
        })
    }

    /// Top email-less contacts of every company, best first.
    async fn enrichment_targets(&self, user_id: UserId, companies: &[Company]) -> Result<Vec<ContactId>, EnrichmentError> {
        let mut targets = Vec::new();
        for company in companies {
            let mut contacts: Vec<Contact> = self
                .store
                .list_contacts(user_id, company.id)
                .await?
                .into_iter()
                .filter(|c| !c.has_usable_email())
                .collect();
            contacts.sort_by(|a, b| b.probability.cmp(&a.probability));
            targets.extend(contacts.iter().take(self.config.contacts_per_company).map(|c| c.id));
        }
        Ok(targets)
    }

    async fn enrich_batches(
        &self,
        request: &SearchRequest,
        targets: &[ContactId],
        progress: &dyn ProgressSink,
    ) -> Result<(Vec<ContactOutcome>, Option<String>), EnrichmentError> {
        let total = targets.len();
        let mut outcomes = Vec::with_capacity(total);
        progress.report(SearchProgress::new(SearchPhase::EnrichingEmails, 0, total)).await;

        for (i, batch) in targets.chunks(self.config.batch_size.max(1)).enumerate() {
            // The run was prechecked before discovery; later batches stop
            // cleanly once the balance runs out and keep what was found.
            if i > 0 {
                match self.billing.precheck(request.user_id).await {
                    Ok(_) => {}
                    Err(BillingError::InsufficientCredits { balance, required }) => {
                        tracing::warn!(
                            job_id = %request.job_id,
                            enriched = outcomes.len(),
                            remaining = total - outcomes.len(),
                            balance,
                            "credits exhausted; finishing with partial results"
                        );
                        let reason = format!(
                            "insufficient credits: balance {balance}, required {required}; {} of {total} contacts enriched",
                            outcomes.len()
                        );
                        return Ok((outcomes, Some(reason)));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            let results = join_all(
                batch
                    .iter()
                    .map(|contact_id| self.enrich_one(request.user_id, request.job_id, *contact_id)),
            )
            .await;
            for result in results {
                outcomes.push(result?);
            }
            progress.report(SearchProgress::new(SearchPhase::EnrichingEmails, outcomes.len(), total)).await;
        }
        Ok((outcomes, None))
    }

    async fn enrich_one(&self, user_id: UserId, job_id: JobId, contact_id: ContactId) -> Result<ContactOutcome, EnrichmentError> {
        let outcome = self.waterfall.enrich_contact(user_id, contact_id).await?;
        let settlement = self.billing.settle(user_id, Some(job_id), contact_id, &outcome).await?;
        Ok(ContactOutcome {
            contact_id,
            outcome,
            settlement,
        })
    }

    async fn summarize(
        &self,
        user_id: UserId,
        companies: &[Company],
        outcomes: Vec<ContactOutcome>,
    ) -> Result<SearchResults, EnrichmentError> {
        let mut summaries = Vec::with_capacity(companies.len());
        let mut contacts_found = 0;
        for company in companies {
            let contacts: Vec<ContactSummary> = self
                .store
                .list_contacts(user_id, company.id)
                .await?
                .into_iter()
                .map(|c| ContactSummary {
                    id: c.id,
                    name: c.name,
                    role: c.role,
                    email: c.email,
                    probability: c.probability,
                })
                .collect();
            contacts_found += contacts.len();
            summaries.push(CompanySummary {
                id: company.id,
                name: company.name.clone(),
                website: company.website.clone(),
                contacts,
            });
        }

        let emails_discovered = outcomes.iter().filter(|o| o.outcome.is_discovery()).count();
        let credits_charged = outcomes
            .iter()
            .map(|o| match o.settlement {
                Settlement::Charged { amount, .. } => u64::from(amount),
                _ => 0,
            })
            .sum();

        Ok(SearchResults {
            companies: summaries,
            contacts_found,
            emails_discovered,
            credits_charged,
            outcomes,
            stopped_early: None,
        })
    }
}
