use anyhow::anyhow;
use serde::Serialize;
use std::collections::HashMap;

use crate::sheet::{Cell, Table};
use crate::students::Student;

/// Positional fixed columns of a score sheet; every later column is a subject.
pub const FIXED_FIELDS: [&str; 5] = ["exam", "id", "name", "grade", "class"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub exam: String,
    pub student_id: String,
    pub name: String,
    pub grade: String,
    pub class_name: String,
    pub scores: HashMap<String, Cell>,
}

impl ScoreRow {
    pub fn student(&self) -> Student {
        Student {
            id: self.student_id.clone(),
            name: self.name.clone(),
            grade: self.grade.clone(),
            class_name: self.class_name.clone(),
        }
    }

    /// Absent and blank subject fields both read as `None`.
    pub fn score(&self, subject: &str) -> Option<&Cell> {
        self.scores.get(subject).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreRepository {
    pub subjects: Vec<String>,
    pub rows: Vec<ScoreRow>,
}

impl ScoreRepository {
    pub fn from_table(table: &Table) -> anyhow::Result<ScoreRepository> {
        let Some((header, body)) = table.rows.split_first() else {
            return Err(anyhow!("score sheet is empty"));
        };
        if header.len() < FIXED_FIELDS.len() {
            return Err(anyhow!(
                "score sheet needs at least {} columns ({}); found {}",
                FIXED_FIELDS.len(),
                FIXED_FIELDS.join(", "),
                header.len()
            ));
        }

        let mut subjects: Vec<String> = Vec::new();
        let mut subject_cols: Vec<(usize, String)> = Vec::new();
        for (col, cell) in header.iter().enumerate().skip(FIXED_FIELDS.len()) {
            let name = cell.text().trim().to_string();
            if name.is_empty() || subjects.contains(&name) {
                continue;
            }
            subjects.push(name.clone());
            subject_cols.push((col, name));
        }

        let mut rows = Vec::with_capacity(body.len());
        for (i, raw) in body.iter().enumerate() {
            let mut fixed: Vec<String> = Vec::with_capacity(FIXED_FIELDS.len());
            for (col, field) in FIXED_FIELDS.iter().enumerate() {
                let v = raw.get(col).map(|c| c.text()).unwrap_or_default();
                if v.trim().is_empty() {
                    return Err(anyhow!(
                        "row {}: missing required field '{}'",
                        table.source_row(i + 1),
                        field
                    ));
                }
                fixed.push(v.trim().to_string());
            }
            let scores = subject_cols
                .iter()
                .filter_map(|(col, name)| match raw.get(*col) {
                    Some(c) if !c.is_empty() => Some((name.clone(), c.clone())),
                    _ => None,
                })
                .collect();
            let mut fixed = fixed.into_iter();
            rows.push(ScoreRow {
                exam: fixed.next().unwrap_or_default(),
                student_id: fixed.next().unwrap_or_default(),
                name: fixed.next().unwrap_or_default(),
                grade: fixed.next().unwrap_or_default(),
                class_name: fixed.next().unwrap_or_default(),
                scores,
            });
        }

        Ok(ScoreRepository { subjects, rows })
    }
}
