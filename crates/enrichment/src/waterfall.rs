//! Waterfall Orchestrator.
//!
//! Runs the email tiers for one contact in fixed order, stops at the first
//! accepted address, and records every attempted tier on the contact before
//! moving to the next one. A tier already in `completed_searches` is never
//! called again for that contact, which is what makes retried jobs cheap.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use prospector_core::{ContactId, UserId};

use crate::error::EnrichmentError;
use crate::model::{Contact, TierId};
use crate::providers::{EmailProvider, ProviderError, ProviderResult, ProviderTarget};
use crate::scoring::EmailScorer;
use crate::store::TargetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallConfig {
    /// Per provider call.
    pub call_timeout: Duration,
    /// Probability drop once every tier has been tried without success.
    pub exhaustion_penalty: u8,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            exhaustion_penalty: 15,
        }
    }
}

/// Result of enriching one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    /// A new address was accepted from `tier`. The only billable outcome.
    Discovered { tier: TierId, email: String, confidence: u8 },
    /// The contact already had a usable address; no tier ran.
    AlreadyEnriched,
    /// Every email tier has been attempted without success.
    Exhausted { attempted: Vec<TierId> },
    /// Some tiers could not run because their provider is unavailable.
    Incomplete { attempted: Vec<TierId>, unavailable: Vec<TierId> },
    TargetNotFound,
}

impl EnrichmentOutcome {
    pub fn is_discovery(&self) -> bool {
        matches!(self, EnrichmentOutcome::Discovered { .. })
    }
}

enum TierAttempt {
    Answered(ProviderResult),
    Failed(String),
    Unavailable,
}

pub struct WaterfallOrchestrator {
    providers: Vec<Arc<dyn EmailProvider>>,
    store: Arc<dyn TargetStore>,
    scorer: EmailScorer,
    config: WaterfallConfig,
}

impl WaterfallOrchestrator {
    /// Providers are ordered by waterfall priority; non-email tiers are ignored.
    pub fn new(
        providers: Vec<Arc<dyn EmailProvider>>,
        store: Arc<dyn TargetStore>,
        scorer: EmailScorer,
        config: WaterfallConfig,
    ) -> Self {
        let mut providers: Vec<_> = providers.into_iter().filter(|p| p.tier().is_email_tier()).collect();
        providers.sort_by_key(|p| TierId::EMAIL_WATERFALL.iter().position(|t| *t == p.tier()));
        Self {
            providers,
            store,
            scorer,
            config,
        }
    }

    /// Tiers whose provider has credentials, in execution order.
    pub fn available_tiers(&self) -> Vec<TierId> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.tier())
            .collect()
    }

    pub fn has_available_tier(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id, contact_id = %contact_id))]
    pub async fn enrich_contact(&self, user_id: UserId, contact_id: ContactId) -> Result<EnrichmentOutcome, EnrichmentError> {
        if !self.has_available_tier() {
            return Err(EnrichmentError::systemic("no email provider is available"));
        }

        let Some(mut contact) = self.store.get_contact(user_id, contact_id).await? else {
            tracing::warn!("contact not found");
            return Ok(EnrichmentOutcome::TargetNotFound);
        };
        if contact.has_usable_email() {
            return Ok(EnrichmentOutcome::AlreadyEnriched);
        }

        let company = match contact.company_id {
            Some(company_id) => self.store.get_company(user_id, company_id).await?,
            None => None,
        };
        let target = ProviderTarget::from_contact(&contact, company.as_ref());
        let expected_domain = target.domain.clone();
        let mut unavailable = Vec::new();

        for provider in &self.providers {
            let tier = provider.tier();
            if contact.completed_searches.contains(tier) {
                continue;
            }

            match self.attempt(provider.as_ref(), &target).await {
                TierAttempt::Unavailable => {
                    tracing::debug!(tier = %tier, "tier unavailable, skipped");
                    unavailable.push(tier);
                    continue;
                }
                TierAttempt::Failed(reason) => {
                    tracing::warn!(tier = %tier, reason = %reason, "tier failed");
                }
                TierAttempt::Answered(result) => {
                    if let Some(outcome) =
                        self.accept(&mut contact, tier, &result, expected_domain.as_deref())
                    {
                        contact.completed_searches.record(tier);
                        self.store.update_contact(&contact).await?;
                        tracing::info!(tier = %tier, "email discovered");
                        return Ok(outcome);
                    }
                }
            }

            contact.completed_searches.record(tier);
            contact.touch();
            self.store.update_contact(&contact).await?;
        }

        let attempted: Vec<TierId> = TierId::EMAIL_WATERFALL
            .into_iter()
            .filter(|t| contact.completed_searches.contains(*t))
            .collect();

        if attempted.len() < TierId::EMAIL_WATERFALL.len() {
            return Ok(EnrichmentOutcome::Incomplete { attempted, unavailable });
        }

        if contact.completed_searches.record(TierId::ComprehensiveSearch) {
            contact.probability = contact.probability.saturating_sub(self.config.exhaustion_penalty);
            contact.touch();
            self.store.update_contact(&contact).await?;
            tracing::info!(probability = contact.probability, "waterfall exhausted");
        }
        Ok(EnrichmentOutcome::Exhausted { attempted })
    }

    async fn attempt(&self, provider: &dyn EmailProvider, target: &ProviderTarget) -> TierAttempt {
        if !provider.is_available() {
            return TierAttempt::Unavailable;
        }
        match tokio::time::timeout(self.config.call_timeout, provider.search(target)).await {
            Err(_) => TierAttempt::Failed(ProviderError::Timeout.to_string()),
            Ok(Err(ProviderError::Unavailable)) => TierAttempt::Unavailable,
            Ok(Err(e)) => TierAttempt::Failed(e.to_string()),
            Ok(Ok(result)) => TierAttempt::Answered(result),
        }
    }

    /// Validate a provider answer; on acceptance the contact is updated in place.
    fn accept(
        &self,
        contact: &mut Contact,
        tier: TierId,
        result: &ProviderResult,
        expected_domain: Option<&str>,
    ) -> Option<EnrichmentOutcome> {
        let value = result.value.as_deref().filter(|_| result.found)?;
        let assessment = self.scorer.assess(value, expected_domain, Some(&contact.name));
        if !assessment.accepted {
            if assessment.format_valid && !assessment.placeholder {
                contact.add_alternative_email(value);
            }
            tracing::debug!(tier = %tier, score = assessment.score, "answer rejected by email scorer");
            return None;
        }

        let confidence = ((u16::from(assessment.score) + u16::from(result.confidence.min(100))) / 2) as u8;
        if contact.role.is_none() {
            contact.role = result.role.clone();
        }
        contact.record_discovery(tier, value, confidence);
        Some(EnrichmentOutcome::Discovered {
            tier,
            email: contact.email.clone().unwrap_or_default(),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Company;
    use crate::providers::ScriptedEmailProvider;
    use crate::store::InMemoryTargetStore;

    struct Fixture {
        store: Arc<InMemoryTargetStore>,
        tier_a: Arc<ScriptedEmailProvider>,
        tier_b: Arc<ScriptedEmailProvider>,
        tier_c: Arc<ScriptedEmailProvider>,
        user: UserId,
        contact: Contact,
    }

    impl Fixture {
        async fn new(a: ScriptedEmailProvider, b: ScriptedEmailProvider, c: ScriptedEmailProvider) -> Self {
            let store = InMemoryTargetStore::arc();
            let user = UserId::new();
            let mut company = Company::new(user, None, "Acme");
            company.website = Some("https://acme.io".into());
            store.insert_company(&company).await.unwrap();
            let contact = Contact::new(user, Some(company.id), "Ada Lovelace").with_probability(60);
            store.insert_contact(&contact).await.unwrap();
            Self {
                store,
                tier_a: Arc::new(a),
                tier_b: Arc::new(b),
                tier_c: Arc::new(c),
                user,
                contact,
            }
        }

        fn orchestrator(&self) -> WaterfallOrchestrator {
            WaterfallOrchestrator::new(
                // out of order on purpose
                vec![
                    self.tier_c.clone() as Arc<dyn EmailProvider>,
                    self.tier_a.clone() as Arc<dyn EmailProvider>,
                    self.tier_b.clone() as Arc<dyn EmailProvider>,
                ],
                self.store.clone(),
                EmailScorer::default(),
                WaterfallConfig {
                    call_timeout: Duration::from_millis(50),
                    ..Default::default()
                },
            )
        }

        async fn reload(&self) -> Contact {
            self.store.get_contact(self.user, self.contact.id).await.unwrap().unwrap()
        }
    }

    fn a() -> ScriptedEmailProvider {
        ScriptedEmailProvider::new(TierId::ContactEnrichment)
    }
    fn b() -> ScriptedEmailProvider {
        ScriptedEmailProvider::new(TierId::ApolloSearch)
    }
    fn c() -> ScriptedEmailProvider {
        ScriptedEmailProvider::new(TierId::HunterSearch)
    }

    #[tokio::test]
    async fn first_success_short_circuits_later_tiers() {
        let f = Fixture::new(a(), b().answer("Ada Lovelace", "ada@acme.io", 90), c()).await;
        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();

        assert!(matches!(outcome, EnrichmentOutcome::Discovered { tier: TierId::ApolloSearch, .. }));
        assert_eq!((f.tier_a.calls(), f.tier_b.calls(), f.tier_c.calls()), (1, 1, 0));

        let stored = f.reload().await;
        assert_eq!(stored.email.as_deref(), Some("ada@acme.io"));
        assert_eq!(stored.verification_source, Some(TierId::ApolloSearch));
        assert_eq!(
            stored.completed_searches.as_slice(),
            &[TierId::ContactEnrichment, TierId::ApolloSearch]
        );
        assert!(stored.probability >= 60);
    }

    #[tokio::test]
    async fn attempted_tiers_are_never_repeated() {
        let f = Fixture::new(a(), b(), c()).await;
        let orchestrator = f.orchestrator();

        let first = orchestrator.enrich_contact(f.user, f.contact.id).await.unwrap();
        let second = orchestrator.enrich_contact(f.user, f.contact.id).await.unwrap();

        assert!(matches!(first, EnrichmentOutcome::Exhausted { .. }));
        assert!(matches!(second, EnrichmentOutcome::Exhausted { .. }));
        assert_eq!((f.tier_a.calls(), f.tier_b.calls(), f.tier_c.calls()), (1, 1, 1));

        let stored = f.reload().await;
        assert_eq!(stored.completed_searches.len(), 4);
        assert!(stored.completed_searches.contains(TierId::ComprehensiveSearch));
        // penalty applied once
        assert_eq!(stored.probability, 45);
    }

    #[tokio::test]
    async fn resumes_after_last_recorded_tier() {
        let f = Fixture::new(a(), b(), c().answer("Ada Lovelace", "ada.lovelace@acme.io", 70)).await;
        let mut partial = f.contact.clone();
        partial.completed_searches.record(TierId::ContactEnrichment);
        partial.completed_searches.record(TierId::ApolloSearch);
        f.store.update_contact(&partial).await.unwrap();

        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();
        assert!(matches!(outcome, EnrichmentOutcome::Discovered { tier: TierId::HunterSearch, .. }));
        assert_eq!((f.tier_a.calls(), f.tier_b.calls(), f.tier_c.calls()), (0, 0, 1));
    }

    #[tokio::test]
    async fn placeholder_answer_is_rejected_and_waterfall_continues() {
        let f = Fixture::new(
            a().answer("Ada Lovelace", "noreply@acme.io", 99),
            b().answer("Ada Lovelace", "ada@acme.io", 80),
            c(),
        )
        .await;
        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();

        assert!(matches!(outcome, EnrichmentOutcome::Discovered { tier: TierId::ApolloSearch, .. }));
        let stored = f.reload().await;
        assert_eq!(stored.email.as_deref(), Some("ada@acme.io"));
        assert!(stored.alternative_emails.is_empty());
    }

    #[tokio::test]
    async fn errors_and_timeouts_count_as_attempts() {
        let f = Fixture::new(
            a().otherwise(Err(ProviderError::Http { status: 500, body: "boom".into() })),
            b().with_delay(Duration::from_millis(200)),
            c(),
        )
        .await;
        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();

        assert!(matches!(outcome, EnrichmentOutcome::Exhausted { .. }));
        assert_eq!(f.tier_c.calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_tier_is_skipped_without_being_recorded() {
        let f = Fixture::new(a(), ScriptedEmailProvider::unavailable(TierId::ApolloSearch), c()).await;
        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();

        assert_eq!(
            outcome,
            EnrichmentOutcome::Incomplete {
                attempted: vec![TierId::ContactEnrichment, TierId::HunterSearch],
                unavailable: vec![TierId::ApolloSearch],
            }
        );
        let stored = f.reload().await;
        assert!(!stored.completed_searches.contains(TierId::ApolloSearch));
        assert!(!stored.completed_searches.contains(TierId::ComprehensiveSearch));
        assert_eq!(stored.probability, 60);
    }

    #[tokio::test]
    async fn usable_email_skips_every_tier() {
        let f = Fixture::new(a(), b(), c()).await;
        let enriched = f.contact.clone().with_email("ada@acme.io");
        f.store.update_contact(&enriched).await.unwrap();

        let outcome = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap();
        assert_eq!(outcome, EnrichmentOutcome::AlreadyEnriched);
        assert_eq!(f.tier_a.calls() + f.tier_b.calls() + f.tier_c.calls(), 0);
    }

    #[tokio::test]
    async fn missing_contact_is_entity_scoped() {
        let f = Fixture::new(a(), b(), c()).await;
        let outcome = f.orchestrator().enrich_contact(f.user, ContactId::new()).await.unwrap();
        assert_eq!(outcome, EnrichmentOutcome::TargetNotFound);
    }

    #[tokio::test]
    async fn no_available_tier_is_systemic() {
        let f = Fixture::new(
            ScriptedEmailProvider::unavailable(TierId::ContactEnrichment),
            ScriptedEmailProvider::unavailable(TierId::ApolloSearch),
            ScriptedEmailProvider::unavailable(TierId::HunterSearch),
        )
        .await;
        let err = f.orchestrator().enrich_contact(f.user, f.contact.id).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Systemic(_)));
    }
}
