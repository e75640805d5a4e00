use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{apply_selection, opt_index, refilter, student_json};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_students_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = apply_selection(state, req) {
        return e.response(&req.id);
    }
    let students = match refilter(state) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let list: Vec<serde_json::Value> = students
        .iter()
        .enumerate()
        .map(|(i, s)| student_json(i, s))
        .collect();
    let count = list.len();
    tracing::debug!(count, "student filter applied");
    ok(
        &req.id,
        json!({
            "students": list,
            "count": count,
            "preview": state.preview,
        }),
    )
}

fn handle_students_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let index = match opt_index(req, "index") {
        Ok(Some(i)) => i,
        Ok(None) => return err(&req.id, "bad_params", "missing params.index", None),
        Err(e) => return e.response(&req.id),
    };
    let Some(students) = state.students.as_ref() else {
        return err(&req.id, "no_students", "run students.filter first", None);
    };
    let Some(student) = students.get(index).cloned() else {
        return err(
            &req.id,
            "bad_params",
            format!("index {} out of range (0..{})", index, students.len()),
            None,
        );
    };
    let result = student_json(index, &student);
    state.preview = Some(student);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.filter" => Some(handle_students_filter(state, req)),
        "students.select" => Some(handle_students_select(state, req)),
        _ => None,
    }
}
