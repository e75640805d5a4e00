use anyhow::{anyhow, Context};
use serde::Serialize;
use std::path::Path;

use crate::sheet::{self, Table};
use crate::students::ALL;
use crate::xlsx::Workbook;

const EXAM_SHEETS: [&str; 2] = ["考次", "Exams"];
const CLASS_SHEETS: [&str; 2] = ["班级", "Classes"];
const EXAM_PLACEHOLDERS: [&str; 4] = ["考次", "exam", "exams", "exam name"];

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeClasses {
    pub grade: String,
    pub classes: Vec<String>,
}

/// Exam list plus grade -> classes roster, both in first-appearance order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    pub exams: Vec<String>,
    pub roster: Vec<GradeClasses>,
}

fn is_placeholder(label: &str) -> bool {
    let lower = label.to_lowercase();
    EXAM_PLACEHOLDERS.iter().any(|p| *p == lower)
}

pub fn parse_exams(table: &Table) -> Vec<String> {
    let mut exams: Vec<String> = Vec::new();
    for cell in table.rows.iter().flatten() {
        let label = cell.text().trim().to_string();
        if label.is_empty() || is_placeholder(&label) || exams.contains(&label) {
            continue;
        }
        exams.push(label);
    }
    exams
}

pub fn parse_roster(table: &Table) -> Vec<GradeClasses> {
    let mut roster: Vec<GradeClasses> = Vec::new();
    for row in table.rows.iter().skip(1) {
        let grade = row.first().map(|c| c.text()).unwrap_or_default();
        let class_name = row.get(1).map(|c| c.text()).unwrap_or_default();
        let (grade, class_name) = (grade.trim(), class_name.trim());
        if grade.is_empty() || class_name.is_empty() {
            continue;
        }
        let idx = match roster.iter().position(|g| g.grade == grade) {
            Some(i) => i,
            None => {
                roster.push(GradeClasses {
                    grade: grade.to_string(),
                    classes: Vec::new(),
                });
                roster.len() - 1
            }
        };
        let classes = &mut roster[idx].classes;
        if !classes.iter().any(|c| c == class_name) {
            classes.push(class_name.to_string());
        }
    }
    roster
}

impl ReportConfig {
    pub fn from_tables(exams: &Table, roster: &Table) -> ReportConfig {
        ReportConfig {
            exams: parse_exams(exams),
            roster: parse_roster(roster),
        }
    }

    pub fn from_workbook(path: &Path) -> anyhow::Result<ReportConfig> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        let mut wb = Workbook::open(bytes)?;
        let exam_sheet = find_sheet(&wb, &EXAM_SHEETS)?;
        let class_sheet = find_sheet(&wb, &CLASS_SHEETS)?;
        let exams = wb.read_sheet(&exam_sheet)?;
        let roster = wb.read_sheet(&class_sheet)?;
        Ok(ReportConfig::from_tables(&exams, &roster))
    }

    pub fn from_csv_files(exams_path: &Path, roster_path: &Path) -> anyhow::Result<ReportConfig> {
        let exams = sheet::read_csv_file(exams_path)?;
        let roster = sheet::read_csv_file(roster_path)?;
        Ok(ReportConfig::from_tables(&exams, &roster))
    }

    pub fn grades(&self) -> Vec<String> {
        self.roster.iter().map(|g| g.grade.clone()).collect()
    }

    /// Class choices offered for a grade selection. An empty or `all` selection offers
    /// every class once, in roster order.
    pub fn class_options(&self, grades: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if grades.is_empty() || grades.iter().any(|g| g == ALL) {
            for c in self.roster.iter().flat_map(|g| g.classes.iter()) {
                if !out.contains(c) {
                    out.push(c.clone());
                }
            }
            return out;
        }
        for grade in grades {
            if let Some(g) = self.roster.iter().find(|g| &g.grade == grade) {
                for c in &g.classes {
                    if !out.contains(c) {
                        out.push(c.clone());
                    }
                }
            }
        }
        out
    }
}

fn find_sheet(wb: &Workbook, candidates: &[&str]) -> anyhow::Result<String> {
    candidates
        .iter()
        .find(|name| wb.has_sheet(name))
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("config workbook needs a sheet named {}", candidates.join(" or ")))
}
