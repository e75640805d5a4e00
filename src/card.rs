use serde::{Deserialize, Serialize};

use crate::scores::ScoreRow;
use crate::sheet::Cell;
use crate::students::Student;

pub const CARD_TITLE: &str = "Score Report";
pub const SUBJECT_HEADER: &str = "Subject";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaperSize {
    #[default]
    A4,
    PhotoCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl PaperSize {
    pub fn parse(s: &str) -> Option<PaperSize> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a4" => Some(PaperSize::A4),
            "photo" | "photocard" | "photo-card" | "card" => Some(PaperSize::PhotoCard),
            _ => None,
        }
    }
}

impl Orientation {
    pub fn parse(s: &str) -> Option<Orientation> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperPreset {
    pub size: PaperSize,
    pub orientation: Orientation,
}

impl PaperPreset {
    /// (width, height) in centimetres.
    pub fn dimensions_cm(&self) -> (f32, f32) {
        let (short, long) = match self.size {
            PaperSize::A4 => (21.0, 29.7),
            PaperSize::PhotoCard => (10.0, 14.0),
        };
        match self.orientation {
            Orientation::Portrait => (short, long),
            Orientation::Landscape => (long, short),
        }
    }

    /// CSS pixels at 96 dpi.
    pub fn dimensions_px(&self) -> (f32, f32) {
        let (w, h) = self.dimensions_cm();
        let px_per_cm = 96.0 / 2.54;
        (w * px_per_cm, h * px_per_cm)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardModel {
    pub student: Student,
    pub exams: Vec<String>,
    pub subjects: Vec<String>,
    /// `matrix[subject][exam]`; `None` is a blank cell.
    pub matrix: Vec<Vec<Option<Cell>>>,
}

/// Score lookup joins on student id + exam; the first matching row per exam wins.
pub fn build_card(
    student: &Student,
    rows: &[ScoreRow],
    exams: &[String],
    subjects: &[String],
) -> CardModel {
    let per_exam: Vec<Option<&ScoreRow>> = exams
        .iter()
        .map(|exam| {
            rows.iter()
                .find(|r| r.student_id == student.id && &r.exam == exam)
        })
        .collect();

    let matrix = subjects
        .iter()
        .map(|subject| {
            per_exam
                .iter()
                .map(|row| row.and_then(|r| r.score(subject)).cloned())
                .collect()
        })
        .collect();

    CardModel {
        student: student.clone(),
        exams: exams.to_vec(),
        subjects: subjects.to_vec(),
        matrix,
    }
}

/// Everything a renderer needs; no score lookups left to do.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardLayout {
    pub title: String,
    pub identity_line: String,
    pub corner_header: String,
    pub column_headers: Vec<String>,
    pub row_labels: Vec<String>,
    pub cells: Vec<Vec<String>>,
    pub paper: PaperPreset,
}

impl CardModel {
    pub fn layout(&self, paper: PaperPreset) -> CardLayout {
        CardLayout {
            title: CARD_TITLE.to_string(),
            identity_line: format!(
                "Class: {} | Name: {} | ID: {}",
                self.student.class_name, self.student.name, self.student.id
            ),
            corner_header: SUBJECT_HEADER.to_string(),
            column_headers: self.exams.clone(),
            row_labels: self.subjects.clone(),
            cells: self
                .matrix
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|c| c.as_ref().map(|c| c.text()).unwrap_or_default())
                        .collect()
                })
                .collect(),
            paper,
        }
    }
}
