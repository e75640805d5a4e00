use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::batch::BatchEvent;

pub const STATUS_TTL_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusKind {
    Success,
    Error,
}

/// Everything bound for stdout goes through here so lines never interleave.
#[derive(Clone)]
pub struct EventSink {
    tx: UnboundedSender<serde_json::Value>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<serde_json::Value>) -> Self {
        Self { tx }
    }

    pub fn send(&self, line: serde_json::Value) {
        if self.tx.send(line).is_err() {
            tracing::debug!("stdout writer closed, dropping line");
        }
    }

    pub fn status(&self, kind: StatusKind, message: impl Into<String>) {
        self.send(json!({
            "event": "status",
            "kind": kind,
            "message": message.into(),
            "ttlMs": STATUS_TTL_MS,
            "at": chrono::Utc::now().to_rfc3339(),
        }));
    }
}

pub async fn write_lines(mut rx: UnboundedReceiver<serde_json::Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let line = serde_json::to_string(&value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        if stdout.write_all(line.as_bytes()).await.is_err()
            || stdout.write_all(b"\n").await.is_err()
            || stdout.flush().await.is_err()
        {
            tracing::warn!("stdout closed");
            break;
        }
    }
}

pub fn batch_event_json(event: &BatchEvent) -> serde_json::Value {
    match event {
        BatchEvent::Progress { run_id, progress } => json!({
            "event": "batch.progress",
            "runId": run_id,
            "percent": progress.percent,
            "completed": progress.completed,
            "total": progress.total,
            "text": progress.text,
        }),
        BatchEvent::Completed {
            run_id,
            package_path,
            entries,
            failures,
        } => json!({
            "event": "batch.completed",
            "runId": run_id,
            "packagePath": package_path.to_string_lossy(),
            "entries": entries,
            "failures": failures,
        }),
        BatchEvent::Cancelled {
            run_id,
            completed,
            total,
        } => json!({
            "event": "batch.cancelled",
            "runId": run_id,
            "completed": completed,
            "total": total,
        }),
        BatchEvent::Failed { run_id, message } => json!({
            "event": "batch.failed",
            "runId": run_id,
            "message": message,
        }),
    }
}

pub async fn forward_batch_events(mut rx: UnboundedReceiver<BatchEvent>, sink: EventSink) {
    while let Some(event) = rx.recv().await {
        sink.send(batch_event_json(&event));
        match &event {
            BatchEvent::Completed { entries, .. } => sink.status(
                StatusKind::Success,
                format!("Batch generation complete: {} cards packaged", entries),
            ),
            BatchEvent::Failed { message, .. } => {
                sink.status(StatusKind::Error, format!("Batch packaging failed: {}", message))
            }
            _ => {}
        }
    }
}
