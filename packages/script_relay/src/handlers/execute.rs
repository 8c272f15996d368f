use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use tracing::{info, warn};

use crate::AppState;
use crate::broadcast::DispatchOutcome;
use crate::error::{ExecuteError, ExecuteResponse};
use crate::script::ScriptRequest;

/// `POST /execute_file` - body is a raw file path; broadcasts its contents to every agent
pub async fn execute_file_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ExecuteResponse>), ExecuteError> {
    let body = String::from_utf8_lossy(&body);
    let result = dispatch_script(&state, &body).await;

    if let Err(e) = &result {
        state.metrics.dispatch_rejected();
        if e.is_validation() {
            info!(error = %e, "Rejected execute request");
        } else {
            warn!(error = %e, "Execute request failed");
        }
    }

    result
}

async fn dispatch_script(
    state: &AppState,
    body: &str,
) -> Result<(StatusCode, Json<ExecuteResponse>), ExecuteError> {
    let request = ScriptRequest::load(body, &state.config.extensions).await?;

    if state.registry.count().await == 0 {
        return Err(ExecuteError::NoClients);
    }

    let outcome = state
        .broadcaster
        .broadcast(&request.to_message())
        .await
        .map_err(|e| ExecuteError::Encode(e.to_string()))?;

    // Everyone may have left between the count check and the snapshot
    if outcome.total == 0 {
        return Err(ExecuteError::NoClients);
    }

    state.metrics.dispatch_accepted();
    info!(
        path = %request.path.display(),
        extension = %request.extension,
        bytes = request.contents.len(),
        succeeded = outcome.succeeded,
        failed = outcome.failed(),
        total = outcome.total,
        "Dispatched script"
    );

    Ok(outcome_response(&request.file_name, outcome))
}

/// 200 when every agent took the script, 207 otherwise (including 0 of N).
fn outcome_response(filename: &str, outcome: DispatchOutcome) -> (StatusCode, Json<ExecuteResponse>) {
    if outcome.is_complete() {
        (
            StatusCode::OK,
            Json(ExecuteResponse {
                success: true,
                message: Some(format!("Script '{}' sent to all connected clients", filename)),
                error: None,
                clients_reached: Some(outcome.succeeded),
                total_clients: Some(outcome.total),
            }),
        )
    } else {
        (
            StatusCode::MULTI_STATUS,
            Json(ExecuteResponse {
                success: false,
                message: None,
                error: Some(format!(
                    "Script '{}' only reached {}/{} clients",
                    filename, outcome.succeeded, outcome.total
                )),
                clients_reached: Some(outcome.succeeded),
                total_clients: Some(outcome.total),
            }),
        )
    }
}
