//! Uniform adapters over the external discovery services.
//!
//! Every adapter reports a normalized [`ProviderResult`] or a
//! [`ProviderError`]; the waterfall treats any error as a failed tier and
//! never lets it escape.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use prospector_core::ContactId;

use crate::model::{Company, Contact, TierId};
use crate::request::RoleTier;

pub mod apollo;
pub mod hunter;
pub mod perplexity;
pub mod scripted;

pub use apollo::ApolloClient;
pub use hunter::HunterClient;
pub use perplexity::PerplexityClient;
pub use scripted::{ScriptedDiscovery, ScriptedEmailProvider};

const USER_AGENT: &str = concat!("prospector/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider has no credentials configured")]
    Unavailable,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("provider call timed out")]
    Timeout,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// What an email provider is asked to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTarget {
    pub contact_id: ContactId,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<String>,
    pub company_name: Option<String>,
    pub domain: Option<String>,
}

impl ProviderTarget {
    pub fn from_contact(contact: &Contact, company: Option<&Company>) -> Self {
        let full_name = contact.name.trim().to_string();
        let mut parts = full_name.split_whitespace();
        let first_name = parts.next().unwrap_or_default().to_string();
        let last_name = parts.last().unwrap_or_default().to_string();
        Self {
            contact_id: contact.id,
            full_name,
            first_name,
            last_name,
            role: contact.role.clone(),
            company_name: company.map(|c| c.name.clone()),
            domain: company.and_then(Company::domain),
        }
    }
}

/// Normalized answer of one provider call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderResult {
    pub found: bool,
    pub value: Option<String>,
    pub role: Option<String>,
    /// 0–100.
    pub confidence: u8,
}

impl ProviderResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(value: impl Into<String>, confidence: u8) -> Self {
        Self {
            found: true,
            value: Some(value.into()),
            role: None,
            confidence: confidence.min(100),
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }
}

/// One tier of the email waterfall.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn tier(&self) -> TierId;

    /// False when credentials are missing; the tier is then skipped.
    fn is_available(&self) -> bool;

    async fn search(&self, target: &ProviderTarget) -> Result<ProviderResult, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyCandidate {
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCandidate {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Snippet the name was found in.
    #[serde(default)]
    pub context: Option<String>,
    /// Plausibility assessed by the AI provider, 0–100.
    #[serde(default)]
    pub ai_score: Option<u8>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Company and contact discovery.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn is_available(&self) -> bool;

    async fn discover_companies(&self, query: &str, limit: usize) -> Result<Vec<CompanyCandidate>, ProviderError>;

    async fn discover_contacts(&self, company: &Company, tier: &RoleTier) -> Result<Vec<ContactCandidate>, ProviderError>;
}

/// Connection settings for one HTTP provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success response into [`ProviderError::Http`].
pub(crate) async fn error_for_status(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    ProviderError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_core::UserId;

    #[test]
    fn target_splits_name_and_uses_company_domain() {
        let mut company = Company::new(UserId::new(), None, "Acme");
        company.website = Some("https://acme.io".into());
        let contact = Contact::new(company.user_id, Some(company.id), " Ada King Lovelace ")
            .with_role(Some("CTO".into()));

        let target = ProviderTarget::from_contact(&contact, Some(&company));
        assert_eq!(target.first_name, "Ada");
        assert_eq!(target.last_name, "Lovelace");
        assert_eq!(target.full_name, "Ada King Lovelace");
        assert_eq!(target.domain.as_deref(), Some("acme.io"));
        assert_eq!(target.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let settings = ProviderSettings::new(Some("  ".into()), "https://api.example.io/");
        assert!(settings.api_key.is_none());
        assert_eq!(settings.url("/v1/x"), "https://api.example.io/v1/x");
    }
}
