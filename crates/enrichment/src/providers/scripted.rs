//! Providers that answer from a fixed script.
//!
//! Used when running without provider credentials and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{normalize_name, Company, TierId};
use crate::request::RoleTier;

use super::{
    CompanyCandidate, ContactCandidate, DiscoveryProvider, EmailProvider, ProviderError, ProviderResult,
    ProviderTarget,
};

/// Email tier answering by contact name.
pub struct ScriptedEmailProvider {
    tier: TierId,
    available: bool,
    answers: HashMap<String, Result<ProviderResult, ProviderError>>,
    fallback: Result<ProviderResult, ProviderError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedEmailProvider {
    pub fn new(tier: TierId) -> Self {
        Self {
            tier,
            available: true,
            answers: HashMap::new(),
            fallback: Ok(ProviderResult::not_found()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(tier: TierId) -> Self {
        Self {
            available: false,
            ..Self::new(tier)
        }
    }

    pub fn answer(mut self, name: &str, email: &str, confidence: u8) -> Self {
        self.answers
            .insert(normalize_name(name), Ok(ProviderResult::found(email, confidence)));
        self
    }

    pub fn fail(mut self, name: &str, error: ProviderError) -> Self {
        self.answers.insert(normalize_name(name), Err(error));
        self
    }

    /// Answer for every name without a scripted entry.
    pub fn otherwise(mut self, result: Result<ProviderResult, ProviderError>) -> Self {
        self.fallback = result;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailProvider for ScriptedEmailProvider {
    fn tier(&self) -> TierId {
        self.tier
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn search(&self, target: &ProviderTarget) -> Result<ProviderResult, ProviderError> {
        if !self.available {
            return Err(ProviderError::Unavailable);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .get(&normalize_name(&target.full_name))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Discovery answering from fixed company and contact lists.
pub struct ScriptedDiscovery {
    available: bool,
    companies: Result<Vec<CompanyCandidate>, ProviderError>,
    contacts: HashMap<(String, TierId), Result<Vec<ContactCandidate>, ProviderError>>,
    contact_calls: AtomicUsize,
}

impl Default for ScriptedDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDiscovery {
    pub fn new() -> Self {
        Self {
            available: true,
            companies: Ok(Vec::new()),
            contacts: HashMap::new(),
            contact_calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn company(mut self, name: &str, website: Option<&str>) -> Self {
        if let Ok(list) = &mut self.companies {
            list.push(CompanyCandidate {
                name: name.to_string(),
                website: website.map(str::to_string),
                description: None,
            });
        }
        self
    }

    pub fn failing_companies(mut self, error: ProviderError) -> Self {
        self.companies = Err(error);
        self
    }

    pub fn contact(mut self, company: &str, tier: TierId, name: &str, role: &str, ai_score: u8) -> Self {
        let entry = self
            .contacts
            .entry((normalize_name(company), tier))
            .or_insert_with(|| Ok(Vec::new()));
        if let Ok(list) = entry {
            list.push(ContactCandidate {
                name: name.to_string(),
                role: Some(role.to_string()),
                context: None,
                ai_score: Some(ai_score),
                email: None,
            });
        }
        self
    }

    pub fn failing_contacts(mut self, company: &str, tier: TierId, error: ProviderError) -> Self {
        self.contacts.insert((normalize_name(company), tier), Err(error));
        self
    }

    pub fn contact_calls(&self) -> usize {
        self.contact_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryProvider for ScriptedDiscovery {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn discover_companies(&self, _query: &str, limit: usize) -> Result<Vec<CompanyCandidate>, ProviderError> {
        let mut companies = self.companies.clone()?;
        companies.truncate(limit);
        Ok(companies)
    }

    async fn discover_contacts(&self, company: &Company, tier: &RoleTier) -> Result<Vec<ContactCandidate>, ProviderError> {
        self.contact_calls.fetch_add(1, Ordering::SeqCst);
        self.contacts
            .get(&(normalize_name(&company.name), tier.tier))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
