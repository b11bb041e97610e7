use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::model::{parse_times, Medication, NewMedication, TakenDate, TakenLedger};
use crate::error::AppResult;

/// In-place edit applied under the store's per-record lock.
pub type Mutation<'a> = &'a (dyn Fn(&mut Medication) -> AppResult<()> + Send + Sync);

#[async_trait]
pub trait MedicationStore: Send + Sync {
    async fn insert(&self, new: NewMedication) -> anyhow::Result<Medication>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Medication>>;

    /// Earliest time of day first, then most recently created.
    async fn list_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Medication>>;

    /// Medications whose window covers `date` and whose schedule text contains
    /// `time_fragment`. Callers re-check exact slot membership.
    async fn list_active_on(&self, date: Date, time_fragment: &str)
        -> anyhow::Result<Vec<Medication>>;

    /// Atomic read-modify-write of one record. `Ok(None)` if it does not exist.
    async fn modify(&self, id: Uuid, f: Mutation<'_>) -> AppResult<Option<Medication>>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Debug, FromRow)]
struct MedicationRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    dose: String,
    times: Vec<String>,
    start_date: Date,
    end_date: Date,
    taken_dates: Json<Vec<TakenDate>>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<MedicationRow> for Medication {
    type Error = anyhow::Error;

    fn try_from(r: MedicationRow) -> anyhow::Result<Self> {
        let times = parse_times(&r.times)
            .map_err(|e| anyhow::anyhow!("medication {} has a corrupt schedule: {e}", r.id))?;
        Ok(Self {
            id: r.id,
            owner_id: r.owner_id,
            name: r.name,
            dose: r.dose,
            times,
            start_date: r.start_date,
            end_date: r.end_date,
            taken_dates: TakenLedger::from(r.taken_dates.0),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_models(rows: Vec<MedicationRow>) -> anyhow::Result<Vec<Medication>> {
    rows.into_iter().map(Medication::try_from).collect()
}

const COLUMNS: &str = "id, owner_id, name, dose, times, start_date, end_date, taken_dates, created_at, updated_at";

fn time_strings(med_times: impl IntoIterator<Item = impl ToString>) -> Vec<String> {
    med_times.into_iter().map(|t| t.to_string()).collect()
}

#[derive(Clone)]
pub struct PgMedicationStore {
    db: PgPool,
}

impl PgMedicationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MedicationStore for PgMedicationStore {
    async fn insert(&self, new: NewMedication) -> anyhow::Result<Medication> {
        let row = sqlx::query_as::<_, MedicationRow>(&format!(
            r#"
            INSERT INTO medications (id, owner_id, name, dose, times, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.owner_id)
        .bind(&new.name)
        .bind(&new.dose)
        .bind(time_strings(&new.times))
        .bind(new.start_date)
        .bind(new.end_date)
        .fetch_one(&self.db)
        .await
        .context("insert medication")?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Medication>> {
        let row = sqlx::query_as::<_, MedicationRow>(&format!(
            "SELECT {COLUMNS} FROM medications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get medication")?;
        row.map(Medication::try_from).transpose()
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Medication>> {
        let rows = sqlx::query_as::<_, MedicationRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM medications
            WHERE owner_id = $1
            ORDER BY (SELECT min(t) FROM unnest(times) AS t) ASC, created_at DESC
            "#
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await
        .context("list medications by owner")?;
        into_models(rows)
    }

    async fn list_active_on(
        &self,
        date: Date,
        time_fragment: &str,
    ) -> anyhow::Result<Vec<Medication>> {
        let rows = sqlx::query_as::<_, MedicationRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM medications
            WHERE start_date <= $1
              AND end_date >= $1
              AND array_to_string(times, ',') LIKE '%' || $2 || '%'
            "#
        ))
        .bind(date)
        .bind(time_fragment)
        .fetch_all(&self.db)
        .await
        .context("list medications active on date")?;
        into_models(rows)
    }

    async fn modify(&self, id: Uuid, f: Mutation<'_>) -> AppResult<Option<Medication>> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        let row = sqlx::query_as::<_, MedicationRow>(&format!(
            "SELECT {COLUMNS} FROM medications WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("lock medication")?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut med = Medication::try_from(row)?;
        f(&mut med)?;

        let row = sqlx::query_as::<_, MedicationRow>(&format!(
            r#"
            UPDATE medications
               SET name = $2, dose = $3, times = $4, start_date = $5, end_date = $6,
                   taken = $7, taken_dates = $8, updated_at = now()
             WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&med.name)
        .bind(&med.dose)
        .bind(time_strings(&med.times))
        .bind(med.start_date)
        .bind(med.end_date)
        .bind(med.taken())
        .bind(Json(med.taken_dates.entries()))
        .fetch_one(&mut *tx)
        .await
        .context("update medication")?;
        tx.commit().await.context("commit tx")?;

        Ok(Some(Medication::try_from(row)?))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM medications WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete medication")?;
        Ok(res.rows_affected() > 0)
    }
}
