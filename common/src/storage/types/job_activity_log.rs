use tracing::{debug, error};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

stored_object!(JobActivityLog, "job_activity_log", {
    job_id: String,
    event_type: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    timestamp: DateTime<Utc>
});

impl JobActivityLog {
    pub fn new(job_id: &str, event_type: &str, message: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            event_type: event_type.to_string(),
            message,
            timestamp: now,
        }
    }

    /// Appends an entry to the job's trail. Failures are logged and swallowed so that the
    /// calling operation is never aborted by its own bookkeeping.
    pub async fn record(
        db: &SurrealDbClient,
        job_id: &str,
        event_type: &str,
        message: Option<String>,
    ) {
        let entry = Self::new(job_id, event_type, message);
        match db.store_item(entry).await {
            Ok(_) => debug!(job_id = %job_id, event_type, "job activity recorded"),
            Err(err) => error!(
                job_id = %job_id,
                event_type,
                error = %err,
                "failed to record job activity"
            ),
        }
    }

    /// The job's trail in the order it was written.
    pub async fn for_job(job_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let entries: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id ORDER BY timestamp ASC, id ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn entries_come_back_in_append_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        for event in ["job_created", "file_upload_started", "document_created", "job_completed"] {
            JobActivityLog::record(&db, "job-1", event, None).await;
        }
        JobActivityLog::record(&db, "job-2", "job_created", Some("other".into())).await;

        let events: Vec<String> = JobActivityLog::for_job("job-1", &db)
            .await
            .expect("logs")
            .into_iter()
            .map(|entry| entry.event_type)
            .collect();
        assert_eq!(
            events,
            vec!["job_created", "file_upload_started", "document_created", "job_completed"]
        );
    }

    #[tokio::test]
    async fn unknown_job_has_empty_trail() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        assert!(JobActivityLog::for_job("missing", &db)
            .await
            .expect("logs")
            .is_empty());
    }
}
