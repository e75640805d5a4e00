use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::events::StatusKind;
use crate::ipc::helpers::{fail_visible, opt_path, opt_string_list, selected_subjects};
use crate::ipc::types::{AppState, Request};
use crate::roster::ReportConfig;
use crate::scores::ScoreRepository;
use crate::sheet::{self, Table};
use serde_json::json;
use std::sync::Arc;

fn load_scores(req: &Request) -> anyhow::Result<ScoreRepository> {
    let table = match (opt_path(req, "path"), req.params.get("table")) {
        (Some(path), _) => sheet::read_first_table(&path)?,
        (None, Some(raw)) => Table::from_json(raw)?,
        (None, None) => anyhow::bail!("missing params.path or params.table"),
    };
    ScoreRepository::from_table(&table)
}

fn handle_scores_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    if req.params.get("path").is_none() && req.params.get("table").is_none() {
        return err(&req.id, "bad_params", "missing params.path or params.table", None);
    }
    let repo = match load_scores(req) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "score load failed");
            return fail_visible(
                state,
                req,
                HandlerErr::new("load_failed", format!("Failed to load score file: {e:#}")),
            );
        }
    };

    let rows = repo.rows.len();
    let subjects = repo.subjects.clone();
    tracing::info!(rows, subjects = subjects.len(), "score file loaded");
    state.scores = Some(Arc::new(repo));
    state.students = None;
    state.preview = None;
    state
        .events
        .status(StatusKind::Success, format!("Score file loaded: {} records", rows));
    ok(&req.id, json!({ "rows": rows, "subjects": subjects }))
}

fn load_config(req: &Request) -> anyhow::Result<ReportConfig> {
    if let Some(path) = opt_path(req, "path") {
        return ReportConfig::from_workbook(&path);
    }
    if let (Some(exams), Some(roster)) = (opt_path(req, "examsPath"), opt_path(req, "rosterPath")) {
        return ReportConfig::from_csv_files(&exams, &roster);
    }
    if let (Some(exams), Some(roster)) = (req.params.get("exams"), req.params.get("roster")) {
        return Ok(ReportConfig::from_tables(
            &Table::from_json(exams)?,
            &Table::from_json(roster)?,
        ));
    }
    anyhow::bail!("missing params.path, params.examsPath+rosterPath, or params.exams+roster")
}

fn handle_config_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = match load_config(req) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "config load failed");
            return fail_visible(
                state,
                req,
                HandlerErr::new("load_failed", format!("Failed to load configuration: {e:#}")),
            );
        }
    };

    tracing::info!(exams = cfg.exams.len(), grades = cfg.roster.len(), "configuration loaded");
    let result = json!({
        "exams": cfg.exams,
        "grades": cfg.grades(),
        "roster": cfg.roster,
    });
    state.config = Some(cfg);
    state
        .events
        .status(StatusKind::Success, "Configuration loaded");
    ok(&req.id, result)
}

fn handle_config_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cfg) = state.config.as_ref() else {
        return err(&req.id, "no_config", "load a configuration file first", None);
    };
    let grades = match opt_string_list(req, "grades") {
        Ok(Some(g)) => g,
        Ok(None) => state.selection.grades.clone(),
        Err(e) => return e.response(&req.id),
    };
    ok(
        &req.id,
        json!({
            "grades": cfg.grades(),
            "exams": cfg.exams,
            "classes": cfg.class_options(&grades),
            "subjects": selected_subjects(state),
            "allSubjects": state.scores.as_ref().map(|s| s.subjects.clone()).unwrap_or_default(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.load" => Some(handle_scores_load(state, req)),
        "config.load" => Some(handle_config_load(state, req)),
        "config.options" => Some(handle_config_options(state, req)),
        _ => None,
    }
}
