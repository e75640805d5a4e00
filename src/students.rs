use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::scores::ScoreRow;

/// Selection value meaning "no filtering on this dimension".
pub const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub class_name: String,
}

impl Student {
    /// Composite natural key; the same student appears once per exam in the score sheet.
    pub fn identity_key(&self) -> String {
        format!("{}|{}|{}|{}", self.id, self.name, self.grade, self.class_name)
    }

    pub fn label(&self) -> String {
        format!("{} - {} ({})", self.class_name, self.name, self.id)
    }

    pub fn card_file_name(&self) -> String {
        format!("{}-{}-{}.png", self.class_name, self.name, self.id)
    }
}

fn selects_all(selection: &[String]) -> bool {
    selection.is_empty() || selection.iter().any(|s| s == ALL)
}

/// First-occurrence order, one entry per identity key.
pub fn unique_students(rows: &[ScoreRow]) -> Vec<Student> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let student = row.student();
        if seen.insert(student.identity_key()) {
            out.push(student);
        }
    }
    out
}

/// Grade filter first, then class filter; both narrow.
pub fn filter_students(rows: &[ScoreRow], grades: &[String], classes: &[String]) -> Vec<Student> {
    let mut students = unique_students(rows);
    if !selects_all(grades) {
        students.retain(|s| grades.contains(&s.grade));
    }
    if !selects_all(classes) {
        students.retain(|s| classes.contains(&s.class_name));
    }
    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scores::ScoreRepository;
    use crate::sheet::parse_csv;

    fn rows() -> Vec<ScoreRow> {
        let csv = "\
Exam,ID,Name,Grade,Class,Math
Midterm,1001,Li,G1,A,90
Midterm,1002,Wang,G1,B,80
Midterm,2001,Zhao,G2,A,70
Final,1001,Li,G1,A,91
Final,1002,Wang,G1,B,81
Final,1001,Li,G2,A,50
";
        ScoreRepository::from_table(&parse_csv(csv))
            .expect("load")
            .rows
    }

    fn sel(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedupes_by_identity_key_in_first_occurrence_order() {
        let students = filter_students(&rows(), &sel(&[ALL]), &[]);
        let keys: Vec<String> = students.iter().map(|s| s.identity_key()).collect();
        assert_eq!(
            keys,
            vec!["1001|Li|G1|A", "1002|Wang|G1|B", "2001|Zhao|G2|A", "1001|Li|G2|A"]
        );
    }

    #[test]
    fn grade_and_class_filters_intersect() {
        let rows = rows();
        let all = filter_students(&rows, &[], &[]);
        let g1 = filter_students(&rows, &sel(&["G1"]), &sel(&[ALL]));
        let g1_a = filter_students(&rows, &sel(&["G1"]), &sel(&["A"]));
        let a_only = filter_students(&rows, &[], &sel(&["A"]));

        assert_eq!(g1.len(), 2);
        assert_eq!(g1_a.len(), 1);
        assert_eq!(g1_a[0].name, "Li");
        assert_eq!(a_only.len(), 3);
        assert!(g1.len() <= all.len() && g1_a.len() <= g1.len());
    }

    #[test]
    fn empty_match_and_repeat_runs_are_stable() {
        let rows = rows();
        assert!(filter_students(&rows, &sel(&["G9"]), &[]).is_empty());
        let first = filter_students(&rows, &sel(&["G1", "G2"]), &sel(&["A"]));
        let second = filter_students(&rows, &sel(&["G1", "G2"]), &sel(&["A"]));
        assert_eq!(first, second);
    }

    #[test]
    fn file_name_follows_class_name_id() {
        let s = Student {
            id: "1001".into(),
            name: "Li".into(),
            grade: "G1".into(),
            class_name: "A".into(),
        };
        assert_eq!(s.card_file_name(), "A-Li-1001.png");
        assert_eq!(s.label(), "A - Li (1001)");
    }
}
