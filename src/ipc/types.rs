use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::batch::{BatchController, BatchEvent};
use crate::card::PaperPreset;
use crate::config::DaemonConfig;
use crate::ipc::events::EventSink;
use crate::render::SvgRenderer;
use crate::roster::ReportConfig;
use crate::scores::ScoreRepository;
use crate::students::Student;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Current UI choices. `None` exams/subjects mean "everything checked".
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub grades: Vec<String>,
    pub classes: Vec<String>,
    pub exams: Option<Vec<String>>,
    pub subjects: Option<Vec<String>>,
    pub paper: PaperPreset,
}

/// The one session object; handlers only touch the fields their family owns.
pub struct AppState {
    pub out_dir: PathBuf,
    pub pacing: Duration,
    pub config: Option<ReportConfig>,
    pub scores: Option<Arc<ScoreRepository>>,
    pub selection: Selection,
    /// `None` until a filter has run; `Some(vec![])` is a real empty result.
    pub students: Option<Vec<Student>>,
    pub preview: Option<Student>,
    pub batch: BatchController,
    pub batch_events: UnboundedSender<BatchEvent>,
    pub renderer: Arc<SvgRenderer>,
    pub events: EventSink,
}

impl AppState {
    pub fn new(
        cfg: &DaemonConfig,
        renderer: SvgRenderer,
        events: EventSink,
        batch_events: UnboundedSender<BatchEvent>,
    ) -> Self {
        Self {
            out_dir: cfg.out_dir.clone(),
            pacing: Duration::from_millis(cfg.pacing_ms),
            config: None,
            scores: None,
            selection: Selection::default(),
            students: None,
            preview: None,
            batch: BatchController::new(),
            batch_events,
            renderer: Arc::new(renderer),
            events,
        }
    }
}
