use std::fmt;

use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

/// Lifecycle label of a job, persisted as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Completed,
    FinetunePending,
    FinetuneInProgress,
    /// Status string reported by the fine-tuning provider, stored verbatim.
    Provider(String),
    Failed(String),
}

const FAILED_PREFIX: &str = "failed: ";

impl JobStatus {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Completed => f.write_str("completed"),
            Self::FinetunePending => f.write_str("finetune pending"),
            Self::FinetuneInProgress => f.write_str("finetune in progress"),
            Self::Provider(status) => f.write_str(status),
            Self::Failed(reason) => write!(f, "{FAILED_PREFIX}{reason}"),
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "finetune pending" => Self::FinetunePending,
            "finetune in progress" => Self::FinetuneInProgress,
            other => match other.strip_prefix(FAILED_PREFIX) {
                Some(reason) => Self::Failed(reason.to_string()),
                None => Self::Provider(value),
            },
        }
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.to_string()
    }
}

stored_object!(Job, "job", {
    name: String,
    status: JobStatus,
    file_count: u32,
    document_count: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error_details: Option<String>
});

const DELETE_JOB_CASCADE: &str = r"
    BEGIN TRANSACTION;
    DELETE document WHERE job_id = $job_id;
    DELETE finetuned_model WHERE job_id = $job_id;
    DELETE job_activity_log WHERE job_id = $job_id;
    DELETE type::thing('job', $job_id);
    COMMIT TRANSACTION;
";

impl Job {
    pub fn new(name: String, file_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            name,
            status: JobStatus::Pending,
            file_count,
            document_count: 0,
            completed_at: None,
            error_details: None,
        }
    }

    pub async fn create(name: String, file_count: u32, db: &SurrealDbClient) -> Result<Self, AppError> {
        let job = Self::new(name, file_count);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
    }

    /// All jobs, oldest first.
    pub async fn list(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let jobs: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) ORDER BY created_at ASC")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;
        Ok(jobs)
    }

    pub async fn set_status(
        id: &str,
        status: &JobStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    /// Records a terminal failure; the reason is kept both in the status and in `error_details`.
    pub async fn mark_failed(id: &str, reason: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/status",
                JobStatus::failed(reason).to_string(),
            ))
            .patch(PatchOp::replace("/error_details", reason.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn mark_completed(
        id: &str,
        document_count: u32,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let now = surrealdb::Datetime::from(Utc::now());
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/document_count", document_count))
            .patch(PatchOp::replace("/status", JobStatus::Completed.to_string()))
            .patch(PatchOp::replace("/completed_at", now.clone()))
            .patch(PatchOp::replace("/updated_at", now))
            .await?;
        updated.ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
    }

    /// Deletes the job together with its documents, fine-tune attempts and activity trail.
    pub async fn delete_cascade(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(DELETE_JOB_CASCADE)
            .bind(("job_id", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}
