//! Job record repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use verity_core::{validate_transition, Error, JobRecord, JobRecordStore, JobStatus, Result};

/// PostgreSQL implementation of JobRecordStore.
#[derive(Clone)]
pub struct PgJobRecordStore {
    pool: Pool<Postgres>,
}

impl PgJobRecordStore {
    /// Create a new PgJobRecordStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<JobRecord> {
        let status: String = row.get("status");
        Ok(JobRecord {
            job_id: row.get("job_id"),
            user_id: row.get("user_id"),
            status: status.parse()?,
            report_path: row.get("report_path"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }
}

#[async_trait]
impl JobRecordStore for PgJobRecordStore {
    async fn create_job(&self, user_id: &str) -> Result<String> {
        let job_id = Uuid::now_v7().to_string();

        sqlx::query(
            "INSERT INTO jobs (job_id, user_id, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(&job_id)
        .bind(user_id)
        .bind(JobStatus::Queued.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "jobs", op = "create", job_id = %job_id, "Job record created");
        Ok(job_id)
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        report_path: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock serializes concurrent updates of the same job.
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let current: JobStatus = match current {
            Some(s) => s.parse()?,
            None => {
                return Err(Error::Store(format!(
                    "Job update affected 0 rows (job_id={})",
                    job_id
                )))
            }
        };

        validate_transition(job_id, current, status)?;

        let result = sqlx::query(
            "UPDATE jobs
             SET status = $2, report_path = COALESCE($3, report_path), updated_at = $4
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(report_path)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Store(format!(
                "Job update affected 0 rows (job_id={})",
                job_id
            )));
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "jobs",
            op = "update_status",
            job_id = %job_id,
            from = %current,
            to = %status,
            "Job status updated"
        );
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            "SELECT job_id, user_id, status, report_path, created_at
             FROM jobs WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list_jobs_for_user(&self, user_id: &str) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT job_id, user_id, status, report_path, created_at
             FROM jobs WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Store(format!(
                "Job delete affected 0 rows (job_id={})",
                job_id
            )));
        }
        Ok(())
    }
}
