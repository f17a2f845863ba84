use axum::response::Json;
use serde_json::json;

/// Health check endpoint handler.
///
/// Returns `{"status": "pong"}` without touching the store, so load balancers
/// can probe liveness cheaply.
///
/// ```bash
/// curl http://localhost:3000/ping
/// ```
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "pong" }))
}
