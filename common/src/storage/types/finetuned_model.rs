use surrealdb::opt::PatchOp;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::new_record_id;

stored_object!(FineTunedModel, "finetuned_model", {
    job_id: String,
    #[serde(default)]
    openai_job_id: Option<String>,
    #[serde(default)]
    openai_model_id: Option<String>
});

impl FineTunedModel {
    pub fn new(job_id: &str, openai_job_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_record_id(),
            created_at: now,
            updated_at: now,
            job_id: job_id.to_string(),
            openai_job_id: Some(openai_job_id),
            openai_model_id: None,
        }
    }

    /// Most recently submitted attempt for the job.
    pub async fn latest_for_job(
        job_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut models: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE job_id = $job_id ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("job_id", job_id.to_string()))
            .await?
            .take(0)?;
        Ok(models.pop())
    }

    /// Model id of the latest attempt, if that attempt has produced one.
    pub async fn ready_model_for_job(
        job_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<String>, AppError> {
        Ok(Self::latest_for_job(job_id, db)
            .await?
            .and_then(|model| model.openai_model_id))
    }

    pub async fn set_model_id(
        id: &str,
        model_id: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/openai_model_id", model_id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn latest_attempt_wins() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        let mut older = FineTunedModel::new("job-1", "ftjob-old".into());
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = FineTunedModel::new("job-1", "ftjob-new".into());
        db.store_item(older).await.expect("store older");
        db.store_item(newer.clone()).await.expect("store newer");

        let latest = FineTunedModel::latest_for_job("job-1", &db)
            .await
            .expect("query")
            .expect("latest exists");
        assert_eq!(latest.openai_job_id.as_deref(), Some("ftjob-new"));
        assert!(FineTunedModel::ready_model_for_job("job-1", &db)
            .await
            .expect("query")
            .is_none());

        FineTunedModel::set_model_id(&newer.id, Some("ft:gpt-4o:demo".into()), &db)
            .await
            .expect("set model");
        assert_eq!(
            FineTunedModel::ready_model_for_job("job-1", &db)
                .await
                .expect("query")
                .as_deref(),
            Some("ft:gpt-4o:demo")
        );
    }
}
