use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let batch = state.batch.snapshot();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "outDir": state.out_dir.to_string_lossy(),
            "scoreRows": state.scores.as_ref().map(|s| s.rows.len()).unwrap_or(0),
            "subjects": state.scores.as_ref().map(|s| s.subjects.len()).unwrap_or(0),
            "configLoaded": state.config.is_some(),
            "filteredStudents": state.students.as_ref().map(|s| s.len()),
            "batchStatus": batch.status,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        _ => None,
    }
}
