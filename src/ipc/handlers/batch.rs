use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchJob, StartError};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::events::StatusKind;
use crate::ipc::helpers::{
    apply_selection, fail_visible, opt_path, refilter, selected_exams, selected_subjects,
};
use crate::ipc::types::{AppState, Request};

fn handle_batch_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.batch.is_running() {
        return fail_visible(
            state,
            req,
            HandlerErr::new("batch_running", "Batch generation is already running"),
        );
    }
    if let Err(e) = apply_selection(state, req) {
        return e.response(&req.id);
    }
    let pacing = match req.params.get("pacingMs") {
        None | Some(serde_json::Value::Null) => state.pacing,
        Some(v) => match v.as_u64() {
            Some(ms) => Duration::from_millis(ms),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "pacingMs must be a non-negative integer",
                    None,
                )
            }
        },
    };

    let students = match refilter(state) {
        Ok(s) => s.to_vec(),
        Err(e) => return fail_visible(state, req, e),
    };
    if students.is_empty() {
        return fail_visible(
            state,
            req,
            HandlerErr::new("no_students", "No students match the current selection"),
        );
    }
    let exams = match selected_exams(state) {
        Ok(e) => e,
        Err(e) => return fail_visible(state, req, e),
    };
    let Some(scores) = state.scores.as_ref().map(Arc::clone) else {
        return fail_visible(state, req, HandlerErr::new("no_scores", "load a score file first"));
    };

    let job = BatchJob {
        students,
        scores,
        exams,
        subjects: selected_subjects(state),
        paper: state.selection.paper,
        pacing,
    };
    let total = job.students.len();
    let out_dir = opt_path(req, "outDir").unwrap_or_else(|| state.out_dir.clone());
    let renderer = Arc::clone(&state.renderer);
    let events = state.batch_events.clone();

    match state.batch.start(job, renderer, out_dir.clone(), events) {
        Ok(run_id) => ok(
            &req.id,
            json!({
                "runId": run_id,
                "total": total,
                "outDir": out_dir.to_string_lossy(),
            }),
        ),
        Err(e @ StartError::AlreadyRunning) => {
            fail_visible(state, req, HandlerErr::new("batch_running", e.to_string()))
        }
        Err(e @ StartError::NoStudents) => {
            fail_visible(state, req, HandlerErr::new("no_students", e.to_string()))
        }
    }
}

fn handle_batch_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    if !state.batch.cancel() {
        return err(&req.id, "not_running", "no batch run is in progress", None);
    }
    let snap = state.batch.snapshot();
    tracing::info!(run_id = ?snap.run_id, completed = snap.completed, "batch cancellation requested");
    state
        .events
        .status(StatusKind::Error, "Batch generation cancelled");
    ok(
        &req.id,
        json!({
            "runId": snap.run_id,
            "status": snap.status,
        }),
    )
}

fn handle_batch_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snap = state.batch.snapshot();
    let percent = crate::batch::percent(snap.completed, snap.total);
    let mut result = json!(snap);
    result["percent"] = json!(percent);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batch.start" => Some(handle_batch_start(state, req)),
        "batch.cancel" => Some(handle_batch_cancel(state, req)),
        "batch.status" => Some(handle_batch_status(state, req)),
        _ => None,
    }
}
