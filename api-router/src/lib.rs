use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    chat::{chat_by_document, chat_by_job, evaluate_job},
    finetune::{finetune_status, finetune_with_model, request_finetune},
    jobs::{delete_job, get_job_logs, list_jobs},
    probes::{live, ready},
    upload::upload_files,
};

pub mod api_state;
pub mod error;
pub mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let api = Router::new()
        .route(
            "/upload",
            post(upload_files).layer(DefaultBodyLimit::max(
                app_state.config.ingest_max_body_bytes,
            )),
        )
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", axum::routing::delete(delete_job))
        .route("/jobs/{job_id}/logs", get(get_job_logs))
        .route("/jobs/{job_id}/finetune", post(request_finetune))
        .route("/jobs/{job_id}/finetune/model", post(finetune_with_model))
        .route("/jobs/{job_id}/finetune/status", get(finetune_status))
        .route("/jobs/{job_id}/chat", post(chat_by_job))
        .route("/jobs/{job_id}/evaluate", post(evaluate_job))
        .route("/documents/{document_id}/chat", post(chat_by_document));

    probes.merge(api)
}
