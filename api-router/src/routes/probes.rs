use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::storage::store::{ARTIFACTS_CONTAINER, DOCUMENTS_CONTAINER};
use serde_json::json;
use tracing::warn;

use crate::api_state::ApiState;

/// Liveness probe: 200 whenever the process can answer.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: 200 once the database answers and the storage containers exist, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db = state.db.client.query("RETURN true").await.map(|_| ());
    let mut storage = Ok(());
    for container in [DOCUMENTS_CONTAINER, ARTIFACTS_CONTAINER] {
        if let Err(err) = state.storage.ensure_container(container).await {
            storage = Err(err);
            break;
        }
    }

    let check = |ok: bool| if ok { "ok" } else { "fail" };
    let checks = json!({ "db": check(db.is_ok()), "storage": check(storage.is_ok()) });

    match (db, storage) {
        (Ok(()), Ok(())) => (StatusCode::OK, Json(json!({ "status": "ok", "checks": checks }))),
        (db, storage) => {
            let reason = db
                .err()
                .map(|e| e.to_string())
                .or_else(|| storage.err().map(|e| e.to_string()))
                .unwrap_or_default();
            warn!(reason = %reason, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "checks": checks, "reason": reason })),
            )
        }
    }
}
