use serde_json::json;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    events: Vec<serde_json::Value>,
}

impl Sidecar {
    fn spawn(out_dir: &Path, pacing_ms: u64) -> Self {
        let exe = env!("CARGO_BIN_EXE_reportcardd");
        let mut child = Command::new(exe)
            .args(["--no-system-fonts", "--scale", "0.25", "--pacing-ms"])
            .arg(pacing_ms.to_string())
            .arg("--out-dir")
            .arg(out_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn reportcardd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            events: Vec::new(),
        }
    }

    fn read_line(&mut self) -> serde_json::Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read line");
        assert!(!line.trim().is_empty(), "sidecar closed stdout");
        serde_json::from_str(line.trim()).expect("parse line json")
    }

    fn request(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        loop {
            let value = self.read_line();
            if value.get("event").is_some() {
                self.events.push(value);
                continue;
            }
            assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
            return value;
        }
    }

    /// Returns the first event named `name`, whether already buffered or still to come.
    fn wait_event(&mut self, name: &str) -> serde_json::Value {
        if let Some(pos) = self.events.iter().position(|e| e["event"] == name) {
            return self.events.remove(pos);
        }
        loop {
            let value = self.read_line();
            if value["event"] == name {
                return value;
            }
            if value.get("event").is_some() {
                self.events.push(value);
            }
        }
    }

    fn load(&mut self, students: usize) {
        let mut table = vec![json!(["Exam", "ID", "Name", "Grade", "Class", "Math", "English"])];
        for i in 0..students {
            let class = if i % 2 == 0 { "A" } else { "B" };
            table.push(json!(["Final", 1000 + i, format!("S{}", i), "G1", class, 60 + i, 70]));
        }
        let loaded = self.request("load-scores", "scores.load", json!({ "table": table }));
        assert_eq!(loaded["ok"], true);
        let cfg = self.request(
            "load-config",
            "config.load",
            json!({ "exams": [["Final"]], "roster": [["Grade", "Class"], ["G1", "A"], ["G1", "B"]] }),
        );
        assert_eq!(cfg["ok"], true);
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn zip_entries(path: &Path) -> Vec<String> {
    let bytes = std::fs::read(path).expect("read package");
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open package");
    let mut names: Vec<String> = archive.file_names().map(|s| s.to_string()).collect();
    names.sort();
    names
}

#[test]
fn completed_batch_packages_one_card_per_filtered_student() {
    let out = temp_dir("reportcardd-batch-complete");
    let mut sc = Sidecar::spawn(&out, 0);
    sc.load(3);

    let started = sc.request("1", "batch.start", json!({ "grades": ["G1"], "classes": ["A", "B"] }));
    assert_eq!(started["result"]["total"], 3);
    let run_id = started["result"]["runId"].as_str().expect("runId").to_string();

    let done = sc.wait_event("batch.completed");
    assert_eq!(done["runId"], run_id.as_str());
    assert_eq!(done["entries"], 3);

    let progress: Vec<u64> = sc
        .events
        .iter()
        .filter(|e| e["event"] == "batch.progress")
        .filter_map(|e| e["completed"].as_u64())
        .collect();
    assert_eq!(progress, vec![1, 2, 3]);
    let last = sc
        .events
        .iter()
        .rev()
        .find(|e| e["event"] == "batch.progress")
        .expect("progress event");
    assert_eq!(last["percent"], 100);
    assert_eq!(last["text"], "Generating: A - S2 (3/3)");

    let package = out.join("StudentReportCards.zip");
    assert_eq!(done["packagePath"], package.to_string_lossy().to_string());
    assert_eq!(
        zip_entries(&package),
        vec!["A-S0-1000.png", "A-S2-1002.png", "B-S1-1001.png"]
    );

    let status = sc.request("2", "batch.status", json!({}));
    assert_eq!(status["result"]["status"], "completed");
    assert_eq!(status["result"]["completed"], 3);

    sc.finish();
    let _ = std::fs::remove_dir_all(out);
}

#[test]
fn cancelled_batch_leaves_no_package_and_releases_the_guard() {
    let out = temp_dir("reportcardd-batch-cancel");
    let mut sc = Sidecar::spawn(&out, 300);
    sc.load(10);

    let started = sc.request("1", "batch.start", json!({}));
    assert_eq!(started["result"]["total"], 10);

    let second = sc.request("2", "batch.start", json!({}));
    assert_eq!(error_code(&second), Some("batch_running"));

    let cancel = sc.request("3", "batch.cancel", json!({}));
    assert_eq!(cancel["result"]["status"], "cancelling");

    let cancelled = sc.wait_event("batch.cancelled");
    let completed = cancelled["completed"].as_u64().expect("completed");
    assert!(completed < 10);
    assert!(!out.join("StudentReportCards.zip").exists());

    let status = sc.request("4", "batch.status", json!({}));
    assert_eq!(status["result"]["status"], "cancelled");

    let again = sc.request("5", "batch.start", json!({ "pacingMs": 0, "classes": ["B"] }));
    assert_eq!(again["result"]["total"], 5);
    let done = sc.wait_event("batch.completed");
    assert_eq!(done["entries"], 5);

    sc.finish();
    let _ = std::fs::remove_dir_all(out);
}

#[test]
fn empty_selection_is_rejected_before_rendering() {
    let out = temp_dir("reportcardd-batch-empty");
    let mut sc = Sidecar::spawn(&out, 0);

    let before_load = sc.request("1", "batch.start", json!({}));
    assert_eq!(error_code(&before_load), Some("no_scores"));

    sc.load(2);
    let none = sc.request("2", "batch.start", json!({ "classes": ["Z"] }));
    assert_eq!(error_code(&none), Some("no_students"));
    let preview = sc.request("3", "card.preview", json!({}));
    assert_eq!(error_code(&preview), Some("no_students"));

    let status = sc.request("4", "batch.status", json!({}));
    assert_eq!(status["result"]["status"], "idle");
    assert!(sc
        .events
        .iter()
        .any(|e| e["event"] == "status" && e["message"] == "No students match the current selection"));

    sc.finish();
    let _ = std::fs::remove_dir_all(out);
}
