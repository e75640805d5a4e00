use serde_json::Value;
use std::path::PathBuf;

use crate::card::{build_card, CardModel, Orientation, PaperSize};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::students::{filter_students, Student};

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn opt_path(req: &Request, key: &str) -> Option<PathBuf> {
    opt_str(req, key).map(PathBuf::from)
}

/// Accepts `["a", "b"]`, a single `"a"`, or numbers; absent or null gives `None`.
pub fn opt_string_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.trim().to_string()])),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.trim().to_string()),
                    Value::Number(n) => out.push(n.to_string()),
                    _ => {
                        return Err(HandlerErr::new(
                            "bad_params",
                            format!("{} must contain only strings", key),
                        ))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            format!("{} must be a string or an array of strings", key),
        )),
    }
}

pub fn opt_index(req: &Request, key: &str) -> Result<Option<usize>, HandlerErr> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be a non-negative integer", key))),
    }
}

/// Folds any selection params present on the request into the session.
pub fn apply_selection(state: &mut AppState, req: &Request) -> Result<(), HandlerErr> {
    if let Some(v) = opt_string_list(req, "grades")? {
        state.selection.grades = v;
    }
    if let Some(v) = opt_string_list(req, "classes")? {
        state.selection.classes = v;
    }
    if let Some(v) = opt_string_list(req, "exams")? {
        state.selection.exams = Some(v);
    }
    if let Some(v) = opt_string_list(req, "subjects")? {
        state.selection.subjects = Some(v);
    }
    if let Some(raw) = opt_str(req, "paperSize") {
        state.selection.paper.size = PaperSize::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "paperSize must be one of: a4, photo")
        })?;
    }
    if let Some(raw) = opt_str(req, "orientation") {
        state.selection.paper.orientation = Orientation::parse(&raw).ok_or_else(|| {
            HandlerErr::new("bad_params", "orientation must be one of: portrait, landscape")
        })?;
    }
    Ok(())
}

pub fn selected_exams(state: &AppState) -> Result<Vec<String>, HandlerErr> {
    if let Some(exams) = &state.selection.exams {
        return Ok(exams.clone());
    }
    state
        .config
        .as_ref()
        .map(|c| c.exams.clone())
        .ok_or_else(|| HandlerErr::new("no_config", "load a configuration file first"))
}

pub fn selected_subjects(state: &AppState) -> Vec<String> {
    if let Some(subjects) = &state.selection.subjects {
        return subjects.clone();
    }
    state
        .scores
        .as_ref()
        .map(|s| s.subjects.clone())
        .unwrap_or_default()
}

/// Re-runs the Student Filter against the current selection and stores the result.
pub fn refilter(state: &mut AppState) -> Result<&[Student], HandlerErr> {
    let scores = state
        .scores
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_scores", "load a score file first"))?;
    let students = filter_students(&scores.rows, &state.selection.grades, &state.selection.classes);
    if !state
        .preview
        .as_ref()
        .is_some_and(|p| students.contains(p))
    {
        state.preview = students.first().cloned();
    }
    Ok(state.students.insert(students).as_slice())
}

pub fn card_for(state: &AppState, student: &Student) -> Result<CardModel, HandlerErr> {
    let scores = state
        .scores
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_scores", "load a score file first"))?;
    let exams = selected_exams(state)?;
    let subjects = selected_subjects(state);
    Ok(build_card(student, &scores.rows, &exams, &subjects))
}

pub fn student_json(index: usize, s: &Student) -> Value {
    serde_json::json!({
        "index": index,
        "id": s.id,
        "name": s.name,
        "grade": s.grade,
        "className": s.class_name,
        "label": s.label(),
    })
}

/// Error envelope plus an error status line, for failures the user should see.
pub fn fail_visible(state: &AppState, req: &Request, e: HandlerErr) -> Value {
    state
        .events
        .status(crate::ipc::events::StatusKind::Error, e.message.clone());
    e.response(&req.id)
}
