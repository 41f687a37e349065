use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::context::Holmes;
use crate::error::Error;
use crate::script::QueryOutput;

#[derive(Deserialize)]
pub struct ScriptRequest {
    pub script: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScriptResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl From<QueryOutput> for ScriptResult {
    fn from(output: QueryOutput) -> Self {
        Self {
            columns: output.columns,
            rows: output
                .rows
                .iter()
                .map(|row| row.iter().map(|v| v.to_json()).collect())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ScriptResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::Parse { .. } => StatusCode::BAD_REQUEST,
        Error::Lock(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

pub fn router(holmes: Arc<Mutex<Holmes>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route(
            "/v1/script",
            post(move |Json(req): Json<ScriptRequest>| {
                let holmes = Arc::clone(&holmes);
                async move {
                    // the engine is synchronous, so scripts run on the blocking pool
                    let started = std::time::Instant::now();
                    let outcome = tokio::task::spawn_blocking(move || -> crate::error::Result<Vec<QueryOutput>> {
                        let mut holmes = holmes.lock()?;
                        holmes.execute(&req.script)
                    })
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "join error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "join error")
                    })?;
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    match outcome {
                        Ok(outputs) => {
                            info!(ms = elapsed_ms, queries = outputs.len(), "script complete");
                            let body = ScriptResponse {
                                status: "ok".into(),
                                elapsed_ms,
                                results: Some(outputs.into_iter().map(ScriptResult::from).collect()),
                                error: None,
                            };
                            Ok::<_, (StatusCode, &'static str)>((StatusCode::OK, Json(body)))
                        }
                        Err(e) => {
                            let status = status_of(&e);
                            let msg = format!("{e}");
                            warn!(%msg, code = %status.as_u16(), "script error");
                            let body = ScriptResponse {
                                status: "error".into(),
                                elapsed_ms,
                                results: None,
                                error: Some(msg),
                            };
                            Ok((status, Json(body)))
                        }
                    }
                }
            }),
        )
        .layer(cors)
}
