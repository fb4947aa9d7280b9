//! Tier A: AI-analysis provider (chat-completions API).
//!
//! Also serves company and contact discovery. Answers come back as free
//! text that is expected to embed one JSON document.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::{Company, TierId};
use crate::request::RoleTier;

use super::{
    error_for_status, CompanyCandidate, ContactCandidate, DiscoveryProvider, EmailProvider, ProviderError,
    ProviderResult, ProviderSettings, ProviderTarget,
};

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const MODEL: &str = "sonar";

pub struct PerplexityClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl PerplexityClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            http: settings.http_client()?,
            settings,
        })
    }

    async fn complete(&self, system: &str, prompt: String) -> Result<String, ProviderError> {
        let api_key = self.settings.api_key.as_deref().ok_or(ProviderError::Unavailable)?;
        let body = json!({
            "model": MODEL,
            "temperature": 0.1,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .http
            .post(self.settings.url("/chat/completions"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Decode("completion has no choices".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EmailAnswer {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompaniesAnswer {
    #[serde(default)]
    companies: Vec<CompanyCandidate>,
}

#[derive(Debug, Deserialize)]
struct ContactsAnswer {
    #[serde(default)]
    contacts: Vec<RawContact>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    email: Option<String>,
}

/// Pull the first JSON object or array out of a model answer.
///
/// Handles fenced code blocks and leading/trailing prose.
pub(crate) fn extract_json(text: &str) -> Result<Value, ProviderError> {
    let start = text
        .find(['{', '['])
        .ok_or_else(|| ProviderError::Decode("answer contains no JSON".to_string()))?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text
        .rfind(close)
        .filter(|end| *end > start)
        .ok_or_else(|| ProviderError::Decode("answer contains unterminated JSON".to_string()))?;
    serde_json::from_str(&text[start..=end]).map_err(|e| ProviderError::Decode(e.to_string()))
}

fn to_percent(confidence: Option<f64>) -> Option<u8> {
    let c = confidence?;
    if !c.is_finite() {
        return None;
    }
    // Some answers use 0..1, others 0..100.
    let pct = if c <= 1.0 { c * 100.0 } else { c };
    Some(pct.round().clamp(0.0, 100.0) as u8)
}

pub(crate) fn parse_email_answer(text: &str) -> Result<ProviderResult, ProviderError> {
    let answer: EmailAnswer =
        serde_json::from_value(extract_json(text)?).map_err(|e| ProviderError::Decode(e.to_string()))?;
    match answer.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty() && e.contains('@')) {
        Some(email) => Ok(ProviderResult::found(email, to_percent(answer.confidence).unwrap_or(50)).with_role(answer.role)),
        None => Ok(ProviderResult::not_found()),
    }
}

pub(crate) fn parse_companies_answer(text: &str) -> Result<Vec<CompanyCandidate>, ProviderError> {
    let value = extract_json(text)?;
    let companies = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value::<CompaniesAnswer>(value).map(|a| a.companies)
    }
    .map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(companies
        .into_iter()
        .filter(|c: &CompanyCandidate| !c.name.trim().is_empty())
        .collect())
}

pub(crate) fn parse_contacts_answer(text: &str) -> Result<Vec<ContactCandidate>, ProviderError> {
    let value = extract_json(text)?;
    let raw: Vec<RawContact> = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value::<ContactsAnswer>(value).map(|a| a.contacts)
    }
    .map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(raw
        .into_iter()
        .filter(|c| !c.name.trim().is_empty())
        .map(|c| ContactCandidate {
            name: c.name.trim().to_string(),
            role: c.role,
            context: c.context,
            ai_score: to_percent(c.confidence),
            email: c.email,
        })
        .collect())
}

const EMAIL_SYSTEM: &str = "You find verified business email addresses. Answer with one JSON object \
{\"email\": string|null, \"confidence\": 0-100, \"role\": string|null}. Never guess patterns.";

const DISCOVERY_SYSTEM: &str = "You research companies and the people who run them. Answer with JSON only.";

#[async_trait]
impl EmailProvider for PerplexityClient {
    fn tier(&self) -> TierId {
        TierId::ContactEnrichment
    }

    fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    async fn search(&self, target: &ProviderTarget) -> Result<ProviderResult, ProviderError> {
        let company = target.company_name.as_deref().unwrap_or("unknown company");
        let domain = target.domain.as_deref().unwrap_or("unknown");
        let prompt = format!(
            "Find the business email address of {} ({}) at {} (domain: {}).",
            target.full_name,
            target.role.as_deref().unwrap_or("role unknown"),
            company,
            domain,
        );
        let answer = self.complete(EMAIL_SYSTEM, prompt).await?;
        parse_email_answer(&answer)
    }
}

#[async_trait]
impl DiscoveryProvider for PerplexityClient {
    fn is_available(&self) -> bool {
        self.settings.api_key.is_some()
    }

    async fn discover_companies(&self, query: &str, limit: usize) -> Result<Vec<CompanyCandidate>, ProviderError> {
        let prompt = format!(
            "List up to {limit} real companies matching: \"{query}\". Answer as \
             {{\"companies\": [{{\"name\": string, \"website\": string|null, \"description\": string|null}}]}}."
        );
        let answer = self.complete(DISCOVERY_SYSTEM, prompt).await?;
        let mut companies = parse_companies_answer(&answer)?;
        companies.truncate(limit);
        Ok(companies)
    }

    async fn discover_contacts(&self, company: &Company, tier: &RoleTier) -> Result<Vec<ContactCandidate>, ProviderError> {
        let prompt = format!(
            "Name the {} at {} ({}). Only real, named people. Answer as \
             {{\"contacts\": [{{\"name\": string, \"role\": string, \"context\": string, \"confidence\": 0-100}}]}}.",
            tier.focus,
            company.name,
            company.website.as_deref().unwrap_or("website unknown"),
        );
        let answer = self.complete(DISCOVERY_SYSTEM, prompt).await?;
        parse_contacts_answer(&answer)
    }
}
