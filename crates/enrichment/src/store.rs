//! Storage collaborator for contacts and companies.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use prospector_core::{CompanyId, ContactId, Entity, JobId, UserId};

use crate::model::{Company, Contact};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
}

/// User-scoped persistence for enrichment targets.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get_contact(&self, user_id: UserId, id: ContactId) -> Result<Option<Contact>, StoreError>;

    async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError>;

    /// Merge waterfall progress into the stored contact (see
    /// [`Contact::merge_progress`]); the row must exist and belong to
    /// `contact.user_id`.
    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError>;

    /// Contacts of one company, oldest first.
    async fn list_contacts(&self, user_id: UserId, company_id: CompanyId) -> Result<Vec<Contact>, StoreError>;

    async fn get_company(&self, user_id: UserId, id: CompanyId) -> Result<Option<Company>, StoreError>;

    async fn insert_company(&self, company: &Company) -> Result<(), StoreError>;

    /// Merge discovery progress into the stored company (see [`Company::merge_progress`]).
    async fn update_company(&self, company: &Company) -> Result<(), StoreError>;

    /// Companies discovered by one job, oldest first.
    async fn list_companies_by_job(&self, user_id: UserId, job_id: JobId) -> Result<Vec<Company>, StoreError>;
}

/// In-memory target store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTargetStore {
    contacts: RwLock<HashMap<ContactId, Contact>>,
    companies: RwLock<HashMap<CompanyId, Company>>,
}

impl InMemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

fn insert_new<E: Entity + Clone>(rows: &mut HashMap<E::Id, E>, row: &E) -> Result<(), StoreError> {
    if rows.contains_key(row.id()) {
        return Err(StoreError::AlreadyExists);
    }
    rows.insert(row.id().clone(), row.clone());
    Ok(())
}

#[async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn get_contact(&self, user_id: UserId, id: ContactId) -> Result<Option<Contact>, StoreError> {
        let contacts = self.contacts.read().map_err(poisoned)?;
        Ok(contacts.get(&id).filter(|c| c.user_id == user_id).cloned())
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        insert_new(&mut *self.contacts.write().map_err(poisoned)?, contact)
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        match contacts.get_mut(&contact.id) {
            Some(existing) if existing.user_id == contact.user_id => {
                existing.merge_progress(contact);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn list_contacts(&self, user_id: UserId, company_id: CompanyId) -> Result<Vec<Contact>, StoreError> {
        let contacts = self.contacts.read().map_err(poisoned)?;
        let mut list: Vec<Contact> = contacts
            .values()
            .filter(|c| c.user_id == user_id && c.company_id == Some(company_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn get_company(&self, user_id: UserId, id: CompanyId) -> Result<Option<Company>, StoreError> {
        let companies = self.companies.read().map_err(poisoned)?;
        Ok(companies.get(&id).filter(|c| c.user_id == user_id).cloned())
    }

    async fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        insert_new(&mut *self.companies.write().map_err(poisoned)?, company)
    }

    async fn update_company(&self, company: &Company) -> Result<(), StoreError> {
        let mut companies = self.companies.write().map_err(poisoned)?;
        match companies.get_mut(&company.id) {
            Some(existing) if existing.user_id == company.user_id => {
                existing.merge_progress(company);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn list_companies_by_job(&self, user_id: UserId, job_id: JobId) -> Result<Vec<Company>, StoreError> {
        let companies = self.companies.read().map_err(poisoned)?;
        let mut list: Vec<Company> = companies
            .values()
            .filter(|c| c.user_id == user_id && c.job_id == Some(job_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }
}
