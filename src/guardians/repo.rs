use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Directed delegation edge: `guardian_id` watches `subject_id`.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct GuardianLink {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub guardian_id: Uuid,
    pub is_accepted: bool,
    #[serde(skip_serializing)]
    pub invitation_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub invitation_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl GuardianLink {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.invitation_expires_at.is_some_and(|exp| now > exp)
    }
}

#[derive(Debug, Clone)]
pub struct PendingLink {
    pub subject_id: Uuid,
    pub guardian_id: Uuid,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// One edge table, read through a subject index and a guardian index.
#[async_trait]
pub trait GuardianStore: Send + Sync {
    /// `Ok(None)` if a link for the ordered pair already exists.
    async fn insert_pending(&self, pending: PendingLink) -> anyhow::Result<Option<GuardianLink>>;

    async fn find_pending(&self, token: &str, guardian_id: Uuid)
        -> anyhow::Result<Option<GuardianLink>>;

    /// Accepts the link only if it still carries `token`.
    async fn mark_accepted(&self, id: Uuid, token: &str) -> anyhow::Result<Option<GuardianLink>>;

    async fn find_pair(&self, subject_id: Uuid, guardian_id: Uuid)
        -> anyhow::Result<Option<GuardianLink>>;

    async fn delete_pair(&self, subject_id: Uuid, guardian_id: Uuid) -> anyhow::Result<bool>;

    async fn list_by_subject(&self, subject_id: Uuid) -> anyhow::Result<Vec<GuardianLink>>;

    async fn list_by_guardian(&self, guardian_id: Uuid) -> anyhow::Result<Vec<GuardianLink>>;
}

const COLUMNS: &str = "id, subject_id, guardian_id, is_accepted, invitation_token, invitation_expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgGuardianStore {
    db: PgPool,
}

impl PgGuardianStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GuardianStore for PgGuardianStore {
    async fn insert_pending(&self, p: PendingLink) -> anyhow::Result<Option<GuardianLink>> {
        let link = sqlx::query_as::<_, GuardianLink>(&format!(
            r#"
            INSERT INTO guardian_links (id, subject_id, guardian_id, invitation_token, invitation_expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (subject_id, guardian_id) DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(p.subject_id)
        .bind(p.guardian_id)
        .bind(&p.token)
        .bind(p.expires_at)
        .fetch_optional(&self.db)
        .await
        .context("insert guardian link")?;
        Ok(link)
    }

    async fn find_pending(
        &self,
        token: &str,
        guardian_id: Uuid,
    ) -> anyhow::Result<Option<GuardianLink>> {
        let link = sqlx::query_as::<_, GuardianLink>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM guardian_links
            WHERE invitation_token = $1 AND guardian_id = $2
            "#
        ))
        .bind(token)
        .bind(guardian_id)
        .fetch_optional(&self.db)
        .await
        .context("find pending guardian link")?;
        Ok(link)
    }

    async fn mark_accepted(&self, id: Uuid, token: &str) -> anyhow::Result<Option<GuardianLink>> {
        let link = sqlx::query_as::<_, GuardianLink>(&format!(
            r#"
            UPDATE guardian_links
               SET is_accepted = TRUE,
                   invitation_token = NULL,
                   invitation_expires_at = NULL,
                   updated_at = now()
             WHERE id = $1 AND invitation_token = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("accept guardian link")?;
        Ok(link)
    }

    async fn find_pair(
        &self,
        subject_id: Uuid,
        guardian_id: Uuid,
    ) -> anyhow::Result<Option<GuardianLink>> {
        let link = sqlx::query_as::<_, GuardianLink>(&format!(
            "SELECT {COLUMNS} FROM guardian_links WHERE subject_id = $1 AND guardian_id = $2"
        ))
        .bind(subject_id)
        .bind(guardian_id)
        .fetch_optional(&self.db)
        .await
        .context("find guardian link")?;
        Ok(link)
    }

    async fn delete_pair(&self, subject_id: Uuid, guardian_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM guardian_links WHERE subject_id = $1 AND guardian_id = $2")
            .bind(subject_id)
            .bind(guardian_id)
            .execute(&self.db)
            .await
            .context("delete guardian link")?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_by_subject(&self, subject_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
        let links = sqlx::query_as::<_, GuardianLink>(&format!(
            "SELECT {COLUMNS} FROM guardian_links WHERE subject_id = $1 ORDER BY created_at ASC"
        ))
        .bind(subject_id)
        .fetch_all(&self.db)
        .await
        .context("list guardians of subject")?;
        Ok(links)
    }

    async fn list_by_guardian(&self, guardian_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
        let links = sqlx::query_as::<_, GuardianLink>(&format!(
            "SELECT {COLUMNS} FROM guardian_links WHERE guardian_id = $1 ORDER BY created_at ASC"
        ))
        .bind(guardian_id)
        .fetch_all(&self.db)
        .await
        .context("list subjects of guardian")?;
        Ok(links)
    }
}
