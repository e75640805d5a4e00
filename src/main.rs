mod archive;
mod batch;
mod card;
mod config;
mod ipc;
mod render;
mod roster;
mod scores;
mod sheet;
mod students;
mod xlsx;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::ipc::events::{self, EventSink};
use crate::render::SvgRenderer;

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = DaemonConfig::parse();
    init_tracing(&cfg.log_filter);

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let sink = EventSink::new(line_tx);
    let writer = tokio::spawn(events::write_lines(line_rx));
    let forwarder = tokio::spawn(events::forward_batch_events(batch_rx, sink.clone()));

    let renderer = SvgRenderer::new(&cfg.render_options());
    let mut state = ipc::AppState::new(&cfg, renderer, sink.clone(), batch_tx);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), out_dir = %cfg.out_dir.display(), "reportcardd ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let mut resp = ipc::err("", "bad_json", e.to_string(), None);
                if let Some(obj) = resp.as_object_mut() {
                    obj.remove("id");
                }
                sink.send(resp);
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req).await;
        sink.send(resp);
    }

    if state.batch.cancel() {
        tracing::info!("stdin closed, cancelling running batch");
    }
    state.batch.wait().await;

    // Every sender must go before the writer can drain and stop.
    drop(state);
    drop(sink);
    let _ = forwarder.await;
    let _ = writer.await;
    Ok(())
}
