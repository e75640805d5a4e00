use base64::Engine;
use serde_json::json;
use std::sync::Arc;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::events::StatusKind;
use crate::ipc::helpers::{
    apply_selection, card_for, fail_visible, opt_index, opt_path, refilter, student_json,
};
use crate::ipc::types::{AppState, Request};
use crate::archive;
use crate::render::CardRenderer;

async fn handle_card_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = apply_selection(state, req) {
        return e.response(&req.id);
    }
    let index = match opt_index(req, "index") {
        Ok(i) => i,
        Err(e) => return e.response(&req.id),
    };
    let students = match refilter(state) {
        Ok(s) => s,
        Err(e) => return fail_visible(state, req, e),
    };
    if students.is_empty() {
        return fail_visible(
            state,
            req,
            HandlerErr::new("no_students", "No students match the current selection"),
        );
    }
    if let Some(i) = index {
        let Some(student) = students.get(i).cloned() else {
            let len = students.len();
            return HandlerErr::new("bad_params", format!("index {} out of range (0..{})", i, len))
                .response(&req.id);
        };
        state.preview = Some(student);
    }
    let Some(student) = state.preview.clone() else {
        return fail_visible(state, req, HandlerErr::new("no_preview", "No student to preview"));
    };
    let position = state
        .students
        .as_ref()
        .and_then(|list| list.iter().position(|s| *s == student))
        .unwrap_or(0);

    let card = match card_for(state, &student) {
        Ok(c) => c,
        Err(e) => return fail_visible(state, req, e),
    };
    let layout = card.layout(state.selection.paper);
    let (width, height) = layout.paper.dimensions_px();

    let mut result = json!({
        "student": student_json(position, &student),
        "card": card,
        "layout": layout,
        "widthPx": width,
        "heightPx": height,
    });

    let want_png = req
        .params
        .get("render")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if want_png {
        let renderer = Arc::clone(&state.renderer);
        match renderer.render(layout).await {
            Ok(png) => {
                result["pngBase64"] =
                    json!(base64::engine::general_purpose::STANDARD.encode(png));
            }
            Err(e) => {
                tracing::warn!(student = %student.label(), error = %format!("{e:#}"), "preview render failed");
                return fail_visible(
                    state,
                    req,
                    HandlerErr::new("render_failed", format!("Preview render failed: {e:#}")),
                );
            }
        }
    }
    ok(&req.id, result)
}

async fn handle_card_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = apply_selection(state, req) {
        return e.response(&req.id);
    }
    let Some(student) = state.preview.clone() else {
        return fail_visible(
            state,
            req,
            HandlerErr::new("no_preview", "Preview a student before exporting"),
        );
    };
    let card = match card_for(state, &student) {
        Ok(c) => c,
        Err(e) => return fail_visible(state, req, e),
    };
    let layout = card.layout(state.selection.paper);
    let out_dir = opt_path(req, "outDir").unwrap_or_else(|| state.out_dir.clone());
    let file_name = student.card_file_name();

    let renderer = Arc::clone(&state.renderer);
    let png = match renderer.render(layout).await {
        Ok(png) => png,
        Err(e) => {
            tracing::warn!(student = %student.label(), error = %format!("{e:#}"), "card export render failed");
            return fail_visible(
                state,
                req,
                HandlerErr::new("render_failed", format!("Card render failed: {e:#}")),
            );
        }
    };
    let path = match archive::save_blob(&out_dir, &file_name, &png).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "card export save failed");
            return fail_visible(
                state,
                req,
                HandlerErr::new("save_failed", format!("Failed to save card: {e:#}")),
            );
        }
    };

    tracing::info!(path = %path.display(), "card exported");
    state
        .events
        .status(StatusKind::Success, format!("Card saved: {}", file_name));
    ok(
        &req.id,
        json!({
            "path": path.to_string_lossy(),
            "fileName": file_name,
            "bytes": png.len(),
        }),
    )
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "card.preview" => Some(handle_card_preview(state, req).await),
        "card.export" => Some(handle_card_export(state, req).await),
        _ => None,
    }
}
