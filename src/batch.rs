use anyhow::{anyhow, Context};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::archive::{self, ArchiveAssembler, PACKAGE_NAME};
use crate::card::{build_card, PaperPreset};
use crate::render::CardRenderer;
use crate::scores::ScoreRepository;
use crate::students::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    #[default]
    Idle,
    Running,
    Cancelling,
    Completed,
    Cancelled,
    Failed,
}

impl BatchStatus {
    pub fn is_active(self) -> bool {
        matches!(self, BatchStatus::Running | BatchStatus::Cancelling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub student: String,
    pub file_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub run_id: Option<String>,
    pub status: BatchStatus,
    pub total: usize,
    pub completed: usize,
    pub current: Option<String>,
    pub failures: Vec<BatchFailure>,
    pub package_path: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u32,
    pub text: String,
}

pub fn percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (completed as f64 * 100.0 / total as f64).round() as u32
}

pub fn progress_text(student: &Student, completed: usize, total: usize) -> String {
    format!(
        "Generating: {} - {} ({}/{})",
        student.class_name, student.name, completed, total
    )
}

/// Inputs frozen when a run starts; later selection changes do not reach it.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub students: Vec<Student>,
    pub scores: Arc<ScoreRepository>,
    pub exams: Vec<String>,
    pub subjects: Vec<String>,
    pub paper: PaperPreset,
    pub pacing: Duration,
}

#[derive(Debug)]
pub enum BatchOutcome {
    Completed {
        archive: ArchiveAssembler,
        failures: Vec<BatchFailure>,
    },
    Cancelled {
        completed: usize,
        failures: Vec<BatchFailure>,
    },
}

/// Renders every student in order, one at a time. Cancellation is observed before each
/// student and once more after the last one; a render that has started always finishes.
pub async fn run_batch<R, F>(
    job: &BatchJob,
    renderer: &R,
    cancel: &CancelToken,
    mut on_progress: F,
) -> BatchOutcome
where
    R: CardRenderer,
    F: FnMut(&BatchProgress) + Send,
{
    let total = job.students.len();
    let mut archive = ArchiveAssembler::new();
    let mut failures: Vec<BatchFailure> = Vec::new();

    for (i, student) in job.students.iter().enumerate() {
        if cancel.is_cancelled() {
            return BatchOutcome::Cancelled {
                completed: i,
                failures,
            };
        }

        let card = build_card(student, &job.scores.rows, &job.exams, &job.subjects);
        let file_name = student.card_file_name();
        match renderer.render(card.layout(job.paper)).await {
            Ok(png) => archive.add(file_name, png),
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(student = %student.label(), error = %message, "card render failed, skipping");
                failures.push(BatchFailure {
                    student: student.label(),
                    file_name,
                    message,
                });
            }
        }

        let completed = i + 1;
        on_progress(&BatchProgress {
            completed,
            total,
            percent: percent(completed, total),
            text: progress_text(student, completed, total),
        });

        if completed < total && !job.pacing.is_zero() {
            tokio::time::sleep(job.pacing).await;
        }
    }

    if cancel.is_cancelled() {
        return BatchOutcome::Cancelled {
            completed: total,
            failures,
        };
    }
    BatchOutcome::Completed { archive, failures }
}

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Progress {
        run_id: String,
        progress: BatchProgress,
    },
    Completed {
        run_id: String,
        package_path: PathBuf,
        entries: usize,
        failures: Vec<BatchFailure>,
    },
    Cancelled {
        run_id: String,
        completed: usize,
        total: usize,
    },
    Failed {
        run_id: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    AlreadyRunning,
    NoStudents,
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::AlreadyRunning => write!(f, "a batch run is already in progress"),
            StartError::NoStudents => write!(f, "no students match the current selection"),
        }
    }
}

fn lock(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// `Ok(None)` when a cancel arrived while the zip was being built; nothing is saved then.
async fn package_and_save(
    assembler: ArchiveAssembler,
    out_dir: &Path,
    cancel: &CancelToken,
) -> anyhow::Result<Option<PathBuf>> {
    if assembler.is_empty() {
        return Err(anyhow!("no cards were rendered"));
    }
    tracing::debug!(entries = ?assembler.names(), "packaging cards");
    let bytes = tokio::task::spawn_blocking(move || assembler.finalize())
        .await
        .context("packaging task did not finish")??;
    if cancel.is_cancelled() {
        return Ok(None);
    }
    archive::save_blob(out_dir, PACKAGE_NAME, &bytes).await.map(Some)
}

fn mark_cancelled(st: &mut BatchState, completed: usize, failures: Vec<BatchFailure>) {
    st.status = BatchStatus::Cancelled;
    st.completed = completed;
    st.failures = failures;
    st.package_path = None;
    st.finished_at = Some(now());
}

/// Owns the one-run-at-a-time guard, the shared BatchState and the cancel flag.
#[derive(Default)]
pub struct BatchController {
    state: Arc<Mutex<BatchState>>,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl BatchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BatchState {
        lock(&self.state).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).status.is_active()
    }

    pub fn start<R: CardRenderer>(
        &mut self,
        job: BatchJob,
        renderer: Arc<R>,
        out_dir: PathBuf,
        events: UnboundedSender<BatchEvent>,
    ) -> Result<String, StartError> {
        let run_id = {
            let mut st = lock(&self.state);
            if st.status.is_active() {
                return Err(StartError::AlreadyRunning);
            }
            // A rejected start leaves the last run's state readable.
            if job.students.is_empty() {
                return Err(StartError::NoStudents);
            }
            let run_id = Uuid::new_v4().to_string();
            *st = BatchState {
                run_id: Some(run_id.clone()),
                status: BatchStatus::Running,
                total: job.students.len(),
                started_at: Some(now()),
                ..BatchState::default()
            };
            run_id
        };

        self.cancel = CancelToken::default();
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        let task_run_id = run_id.clone();
        tracing::info!(run_id = %run_id, total = job.students.len(), "batch run started");

        self.task = Some(tokio::spawn(async move {
            let run_id = task_run_id;
            let progress_state = Arc::clone(&state);
            let progress_events = events.clone();
            let progress_run_id = run_id.clone();
            let outcome = run_batch(&job, renderer.as_ref(), &cancel, move |p| {
                {
                    let mut st = lock(&progress_state);
                    st.completed = p.completed;
                    st.current = Some(p.text.clone());
                }
                let _ = progress_events.send(BatchEvent::Progress {
                    run_id: progress_run_id.clone(),
                    progress: p.clone(),
                });
            })
            .await;

            let total = job.students.len();
            let mut discard: Option<PathBuf> = None;
            let event = match outcome {
                BatchOutcome::Cancelled {
                    completed,
                    failures,
                } => {
                    mark_cancelled(&mut lock(&state), completed, failures);
                    tracing::info!(run_id = %run_id, completed, total, "batch run cancelled");
                    BatchEvent::Cancelled {
                        run_id,
                        completed,
                        total,
                    }
                }
                BatchOutcome::Completed { archive, failures } => {
                    let entries = archive.len();
                    let saved = package_and_save(archive, &out_dir, &cancel).await;
                    // `cancel()` flips the flag under this lock, so the check below and the
                    // final status cannot disagree.
                    let mut st = lock(&state);
                    match saved {
                        Ok(saved) if cancel.is_cancelled() => {
                            discard = saved;
                            mark_cancelled(&mut st, total, failures);
                            tracing::info!(run_id = %run_id, total, "batch run cancelled during packaging");
                            BatchEvent::Cancelled {
                                run_id,
                                completed: total,
                                total,
                            }
                        }
                        Ok(Some(path)) => {
                            st.status = BatchStatus::Completed;
                            st.failures = failures.clone();
                            st.finished_at = Some(now());
                            st.package_path = Some(path.to_string_lossy().to_string());
                            tracing::info!(run_id = %run_id, entries, failed = failures.len(), path = %path.display(), "batch run completed");
                            BatchEvent::Completed {
                                run_id,
                                package_path: path,
                                entries,
                                failures,
                            }
                        }
                        Ok(None) => {
                            mark_cancelled(&mut st, total, failures);
                            BatchEvent::Cancelled {
                                run_id,
                                completed: total,
                                total,
                            }
                        }
                        Err(e) => {
                            let message = format!("{e:#}");
                            st.status = BatchStatus::Failed;
                            st.failures = failures;
                            st.error = Some(message.clone());
                            st.finished_at = Some(now());
                            tracing::error!(run_id = %run_id, error = %message, "batch packaging failed");
                            BatchEvent::Failed { run_id, message }
                        }
                    }
                }
            };
            if let Some(path) = discard {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove cancelled package");
                }
            }
            let _ = events.send(event);
        }));

        Ok(run_id)
    }

    /// Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let mut st = lock(&self.state);
        if !st.status.is_active() {
            return false;
        }
        self.cancel.cancel();
        st.status = BatchStatus::Cancelling;
        true
    }

    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "batch task aborted");
                let mut st = lock(&self.state);
                if st.status.is_active() {
                    st.status = BatchStatus::Failed;
                    st.error = Some(e.to_string());
                }
            }
        }
    }
}
