//! Postgres-backed [`TargetStore`].
//!
//! `completed_searches` and `alternative_emails` are `TEXT[]` columns; tier
//! ids are stored by their wire names. Every query filters on `user_id`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use prospector_core::{CompanyId, ContactId, JobId, UserId};
use prospector_enrichment::{Company, CompletedSearches, Contact, StoreError, TargetStore, TierId};

const CONTACT_COLUMNS: &str = "id, user_id, company_id, name, role, email, alternative_emails, \
     completed_searches, probability, verification_source, created_at, updated_at";

const COMPANY_COLUMNS: &str = "id, user_id, job_id, name, website, description, completed_searches, created_at";

#[derive(Debug, Clone)]
pub struct PostgresTargetStore {
    pool: Arc<PgPool>,
}

impl PostgresTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl TargetStore for PostgresTargetStore {
    #[instrument(skip_all, fields(contact_id = %id), err)]
    async fn get_contact(&self, user_id: UserId, id: ContactId) -> Result<Option<Contact>, StoreError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND user_id = $2");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_contact", e))?;
        row.map(|r| decode_contact(&r)).transpose()
    }

    #[instrument(skip_all, fields(contact_id = %contact.id), err)]
    async fn insert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO contacts (
                id, user_id, company_id, name, role, email, alternative_emails,
                completed_searches, probability, verification_source, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(contact.id.as_uuid())
        .bind(contact.user_id.as_uuid())
        .bind(contact.company_id.map(|c| *c.as_uuid()))
        .bind(&contact.name)
        .bind(&contact.role)
        .bind(&contact.email)
        .bind(&contact.alternative_emails)
        .bind(tier_names(&contact.completed_searches))
        .bind(i16::from(contact.probability))
        .bind(contact.verification_source.map(|t| t.as_str()))
        .bind(contact.created_at)
        .bind(contact.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_contact", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(contact_id = %contact.id), err)]
    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND user_id = $2 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(contact.id.as_uuid())
            .bind(contact.user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_contact", e))?
            .ok_or(StoreError::NotFound)?;
        let mut stored = decode_contact(&row)?;
        stored.merge_progress(contact);

        // Identity columns are never written here.
        sqlx::query(
            r#"
            UPDATE contacts SET
                email = $3,
                alternative_emails = $4,
                completed_searches = $5,
                probability = $6,
                verification_source = $7,
                updated_at = $8
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(stored.user_id.as_uuid())
        .bind(&stored.email)
        .bind(&stored.alternative_emails)
        .bind(tier_names(&stored.completed_searches))
        .bind(i16::from(stored.probability))
        .bind(stored.verification_source.map(|t| t.as_str()))
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_contact", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(company_id = %company_id), err)]
    async fn list_contacts(&self, user_id: UserId, company_id: CompanyId) -> Result<Vec<Contact>, StoreError> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = $1 AND company_id = $2 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(company_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_contacts", e))?;
        rows.iter().map(decode_contact).collect()
    }

    #[instrument(skip_all, fields(company_id = %id), err)]
    async fn get_company(&self, user_id: UserId, id: CompanyId) -> Result<Option<Company>, StoreError> {
        let sql = format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1 AND user_id = $2");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_company", e))?;
        row.map(|r| decode_company(&r)).transpose()
    }

    #[instrument(skip_all, fields(company_id = %company.id), err)]
    async fn insert_company(&self, company: &Company) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, user_id, job_id, name, website, description, completed_searches, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(company.id.as_uuid())
        .bind(company.user_id.as_uuid())
        .bind(company.job_id.map(|j| *j.as_uuid()))
        .bind(&company.name)
        .bind(&company.website)
        .bind(&company.description)
        .bind(tier_names(&company.completed_searches))
        .bind(company.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_company", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(company_id = %company.id), err)]
    async fn update_company(&self, company: &Company) -> Result<(), StoreError> {
        // Tier union happens in SQL so concurrent discoveries cannot drop each other's tiers.
        let result = sqlx::query(
            r#"
            UPDATE companies SET
                website = COALESCE(website, $3),
                description = COALESCE(description, $4),
                completed_searches = completed_searches
                    || ARRAY(SELECT t FROM unnest($5::text[]) WITH ORDINALITY AS n(t, i)
                             WHERE t <> ALL(completed_searches) ORDER BY i)
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(company.id.as_uuid())
        .bind(company.user_id.as_uuid())
        .bind(&company.website)
        .bind(&company.description)
        .bind(tier_names(&company.completed_searches))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_company", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn list_companies_by_job(&self, user_id: UserId, job_id: JobId) -> Result<Vec<Company>, StoreError> {
        let sql = format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE user_id = $1 AND job_id = $2 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(job_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_companies_by_job", e))?;
        rows.iter().map(decode_company).collect()
    }
}

struct ContactRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    company_id: Option<uuid::Uuid>,
    name: String,
    role: Option<String>,
    email: Option<String>,
    alternative_emails: Vec<String>,
    completed_searches: Vec<String>,
    probability: i16,
    verification_source: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ContactRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ContactRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            company_id: row.try_get("company_id")?,
            name: row.try_get("name")?,
            role: row.try_get("role")?,
            email: row.try_get("email")?,
            alternative_emails: row.try_get("alternative_emails")?,
            completed_searches: row.try_get("completed_searches")?,
            probability: row.try_get("probability")?,
            verification_source: row.try_get("verification_source")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ContactRow> for Contact {
    type Error = StoreError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(Contact {
            id: ContactId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            company_id: row.company_id.map(CompanyId::from_uuid),
            name: row.name,
            role: row.role,
            email: row.email,
            alternative_emails: row.alternative_emails,
            completed_searches: parse_tiers(&row.completed_searches)?,
            probability: row.probability.clamp(0, 100) as u8,
            verification_source: row.verification_source.as_deref().map(parse_tier).transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct CompanyRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    job_id: Option<uuid::Uuid>,
    name: String,
    website: Option<String>,
    description: Option<String>,
    completed_searches: Vec<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CompanyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CompanyRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            job_id: row.try_get("job_id")?,
            name: row.try_get("name")?,
            website: row.try_get("website")?,
            description: row.try_get("description")?,
            completed_searches: row.try_get("completed_searches")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<CompanyRow> for Company {
    type Error = StoreError;

    fn try_from(row: CompanyRow) -> Result<Self, Self::Error> {
        Ok(Company {
            id: CompanyId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            job_id: row.job_id.map(JobId::from_uuid),
            name: row.name,
            website: row.website,
            description: row.description,
            completed_searches: parse_tiers(&row.completed_searches)?,
            created_at: row.created_at,
        })
    }
}

fn decode_contact(row: &PgRow) -> Result<Contact, StoreError> {
    ContactRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize contact row: {e}")))?
        .try_into()
}

fn decode_company(row: &PgRow) -> Result<Company, StoreError> {
    CompanyRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize company row: {e}")))?
        .try_into()
}

fn tier_names(searches: &CompletedSearches) -> Vec<&'static str> {
    searches.as_slice().iter().map(TierId::as_str).collect()
}

fn parse_tier(name: &str) -> Result<TierId, StoreError> {
    TierId::from_str(name).map_err(|e| StoreError::Storage(e.to_string()))
}

fn parse_tiers(names: &[String]) -> Result<CompletedSearches, StoreError> {
    names.iter().map(|n| parse_tier(n)).collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::AlreadyExists,
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {}", operation)),
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
