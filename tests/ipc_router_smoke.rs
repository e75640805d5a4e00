use serde_json::json;
use std::io::{BufRead, BufReader, Write};
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

fn spawn_sidecar(out_dir: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .args(["--no-system-fonts", "--pacing-ms", "0", "--out-dir"])
        .arg(out_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_json_line(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    assert!(!line.trim().is_empty(), "sidecar closed stdout");
    serde_json::from_str(line.trim()).expect("parse line json")
}

/// Sends one request and returns its response; event lines seen on the way are collected.
fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    events: &mut Vec<serde_json::Value>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    loop {
        let value = read_json_line(reader);
        if value.get("event").is_some() {
            events.push(value);
            continue;
        }
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let code = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            assert_ne!(
                code, "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
        return value;
    }
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcardd-router-smoke");
    let out_dir = workspace.join("out");
    let scores_csv = workspace.join("scores.csv");
    std::fs::write(
        &scores_csv,
        "Exam,ID,Name,Grade,Class,Math,English\n\
         Midterm,1001,Li,G1,A,90,85\n\
         Final,1001,Li,G1,A,95,88\n\
         Midterm,1002,Wang,G1,B,70,\n\
         Midterm,2001,Zhao,G2,C,60,65\n",
    )
    .expect("write scores csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&out_dir);
    let mut events = Vec::new();
    let ev = &mut events;

    let health = request(&mut stdin, &mut reader, ev, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert_eq!(health["result"]["configLoaded"], false);
    assert_eq!(health["result"]["batchStatus"], "idle");

    let early = request(&mut stdin, &mut reader, ev, "2", "students.filter", json!({}));
    assert_eq!(error_code(&early), Some("no_scores"));

    let loaded = request(
        &mut stdin,
        &mut reader,
        ev,
        "3",
        "scores.load",
        json!({ "path": scores_csv.to_string_lossy() }),
    );
    assert_eq!(loaded["result"]["rows"], 4);
    assert_eq!(loaded["result"]["subjects"], json!(["Math", "English"]));

    let cfg = request(
        &mut stdin,
        &mut reader,
        ev,
        "4",
        "config.load",
        json!({
            "exams": [["Exam"], ["Midterm"], ["Final"], ["Midterm"]],
            "roster": [["Grade", "Class"], ["G1", "A"], ["G1", "B"], ["G2", "C"], ["G1", "A"]],
        }),
    );
    assert_eq!(cfg["result"]["exams"], json!(["Midterm", "Final"]));
    assert_eq!(cfg["result"]["grades"], json!(["G1", "G2"]));

    let opts = request(
        &mut stdin,
        &mut reader,
        ev,
        "5",
        "config.options",
        json!({ "grades": ["G1"] }),
    );
    assert_eq!(opts["result"]["classes"], json!(["A", "B"]));
    let all = request(
        &mut stdin,
        &mut reader,
        ev,
        "6",
        "config.options",
        json!({ "grades": ["all"] }),
    );
    assert_eq!(all["result"]["classes"], json!(["A", "B", "C"]));

    let filtered = request(
        &mut stdin,
        &mut reader,
        ev,
        "7",
        "students.filter",
        json!({ "grades": ["G1"], "classes": ["all"] }),
    );
    assert_eq!(filtered["result"]["count"], 2);
    assert_eq!(filtered["result"]["students"][1]["label"], "B - Wang (1002)");

    let selected = request(
        &mut stdin,
        &mut reader,
        ev,
        "8",
        "students.select",
        json!({ "index": 5 }),
    );
    assert_eq!(error_code(&selected), Some("bad_params"));

    let preview = request(
        &mut stdin,
        &mut reader,
        ev,
        "9",
        "card.preview",
        json!({ "index": 0, "paperSize": "photo" }),
    );
    assert_eq!(preview["ok"], true);
    let layout = &preview["result"]["layout"];
    assert_eq!(layout["identityLine"], "Class: A | Name: Li | ID: 1001");
    assert_eq!(layout["columnHeaders"], json!(["Midterm", "Final"]));
    assert_eq!(layout["cells"], json!([["90", "95"], ["85", "88"]]));

    let wang = request(
        &mut stdin,
        &mut reader,
        ev,
        "10",
        "card.preview",
        json!({ "index": 1, "render": true }),
    );
    assert_eq!(wang["result"]["layout"]["cells"], json!([["70", ""], ["", ""]]));
    let png = wang["result"]["pngBase64"].as_str().expect("png payload");
    assert!(png.starts_with("iVBORw0KGgo"));

    let exported = request(&mut stdin, &mut reader, ev, "11", "card.export", json!({}));
    assert_eq!(exported["result"]["fileName"], "B-Wang-1002.png");
    assert!(out_dir.join("B-Wang-1002.png").is_file());

    let status = request(&mut stdin, &mut reader, ev, "12", "batch.status", json!({}));
    assert_eq!(status["result"]["status"], "idle");
    let cancel = request(&mut stdin, &mut reader, ev, "13", "batch.cancel", json!({}));
    assert_eq!(error_code(&cancel), Some("not_running"));

    writeln!(stdin, r#"{{"id":"14","method":"no.such.method","params":{{}}}}"#)
        .expect("write unknown");
    stdin.flush().expect("flush");
    let unknown = loop {
        let v = read_json_line(&mut reader);
        if v.get("event").is_none() {
            break v;
        }
    };
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "not json").expect("write garbage");
    stdin.flush().expect("flush");
    let bad = loop {
        let v = read_json_line(&mut reader);
        if v.get("event").is_none() {
            break v;
        }
    };
    assert_eq!(error_code(&bad), Some("bad_json"));

    let statuses: Vec<&str> = events
        .iter()
        .filter(|e| e["event"] == "status")
        .filter_map(|e| e["message"].as_str())
        .collect();
    assert!(statuses.contains(&"Score file loaded: 4 records"));
    assert!(statuses.contains(&"Card saved: B-Wang-1002.png"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_load_keeps_previous_scores_and_reports_status() {
    let workspace = temp_dir("reportcardd-load-fail");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace);
    let mut events = Vec::new();
    let ev = &mut events;

    let first = request(
        &mut stdin,
        &mut reader,
        ev,
        "1",
        "scores.load",
        json!({ "table": [["Exam", "ID", "Name", "Grade", "Class", "Math"], ["Final", 1001, "Li", "G1", "A", 88]] }),
    );
    assert_eq!(first["result"]["rows"], 1);

    let broken = request(
        &mut stdin,
        &mut reader,
        ev,
        "2",
        "scores.load",
        json!({ "table": [["Exam", "ID", "Name", "Grade", "Class", "Math"], ["Final", "", "Li", "G1", "A", 88]] }),
    );
    assert_eq!(error_code(&broken), Some("load_failed"));

    let health = request(&mut stdin, &mut reader, ev, "3", "health", json!({}));
    assert_eq!(health["result"]["scoreRows"], 1);

    let missing = request(
        &mut stdin,
        &mut reader,
        ev,
        "4",
        "scores.load",
        json!({ "path": workspace.join("nope.csv").to_string_lossy() }),
    );
    assert_eq!(error_code(&missing), Some("load_failed"));

    let errors = events
        .iter()
        .filter(|e| e["event"] == "status" && e["kind"] == "error")
        .count();
    assert_eq!(errors, 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
