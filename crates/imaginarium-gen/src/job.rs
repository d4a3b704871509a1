//! Job tracking and the shared state of the single active job

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::pipeline::AssetBundle;

/// Progress value meaning "no active job"
pub const IDLE_PROGRESS: f32 = -1.0;

/// Status of a generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    InProgress,
    Complete,
    Cancelled,
    Failed,
}

/// Lifecycle stages of one generation run, with their progress percentages.
///
/// `Started -> Polling` has no observable intermediate; the remaining stages
/// advance as the pipeline passes its checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Started,
    Polling,
    ResultReady,
    Downloaded,
    Assigned,
    Saved,
}

impl Stage {
    pub fn percent(self) -> f32 {
        match self {
            Stage::Idle => IDLE_PROGRESS,
            Stage::Started => 1.0,
            Stage::Polling => 33.0,
            Stage::ResultReady => 66.0,
            Stage::Downloaded => 80.0,
            Stage::Assigned => 90.0,
            Stage::Saved => 100.0,
        }
    }
}

/// A tracked generation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Provider-assigned opaque job ID
    pub id: String,
    /// ISO 8601 timestamp when submitted
    pub submitted_at: String,
    /// Current status
    pub status: JobStatus,
    /// Result URL once the remote job completed
    #[serde(default)]
    pub result_texture_url: Option<String>,
    /// Prompt echoed back with the result
    #[serde(default)]
    pub result_prompt: Option<String>,
}

impl Job {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            submitted_at: now_iso8601(),
            status: JobStatus::Pending,
            result_texture_url: None,
            result_prompt: None,
        }
    }
}

/// Observer for host-side hooks (editor progress bars, texture assignment).
///
/// Every method has a no-op default; running without an observer is never
/// a fault.
pub trait StateObserver: Send + Sync {
    fn on_stage(&self, _stage: Stage, _percent: f32) {}
    fn on_assets_ready(&self, _bundle: &AssetBundle) {}
}

/// Shared state of the single active job.
///
/// The generation future is the only writer; the presentation layer reads
/// progress and requests cancellation. Progress and the cancel flag are
/// lock-free; the job id and preview buffer sit behind short-lived mutexes.
pub struct JobContext {
    progress_bits: AtomicU32,
    cancelled: AtomicBool,
    job_id: Mutex<String>,
    preview: Mutex<Option<RgbImage>>,
    observer: Mutex<Option<Arc<dyn StateObserver>>>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            progress_bits: AtomicU32::new(IDLE_PROGRESS.to_bits()),
            cancelled: AtomicBool::new(false),
            job_id: Mutex::new(String::new()),
            preview: Mutex::new(None),
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn StateObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Current progress: -1 when idle, 0-100 while a job is active
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    /// True when no job is active (sentinel -1 or a finished 100)
    pub fn is_idle(&self) -> bool {
        let p = self.progress();
        p < 0.0 || p >= 100.0
    }

    /// Advance to a lifecycle stage and notify the observer, if any
    pub fn set_stage(&self, stage: Stage) {
        let percent = stage.percent();
        self.progress_bits
            .store(percent.to_bits(), Ordering::Release);
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_stage(stage, percent);
        }
    }

    /// Request cooperative cancellation.
    ///
    /// Progress drops to the idle sentinel immediately; the polling loop
    /// observes the flag at its next check point.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.set_stage(Stage::Idle);
    }

    /// Hand the decoded bundle to the observer for presentation side
    /// effects (texture/sprite assignment in the host)
    pub fn notify_assets_ready(&self, bundle: &AssetBundle) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_assets_ready(bundle);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear the cancel flag at the start of a new run
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn set_job_id(&self, id: &str) {
        *self.job_id.lock().unwrap() = id.to_string();
    }

    pub fn job_id(&self) -> String {
        self.job_id.lock().unwrap().clone()
    }

    /// Drop any residual identity so the idle state carries none
    pub fn clear_job_id(&self) {
        self.job_id.lock().unwrap().clear();
    }

    /// Replace the live preview, releasing the previous one.
    ///
    /// At most one preview buffer is alive at a time.
    pub fn install_preview(&self, preview: RgbImage) {
        *self.preview.lock().unwrap() = Some(preview);
    }

    pub fn clear_preview(&self) {
        *self.preview.lock().unwrap() = None;
    }

    /// Read access to the current preview, if one is installed
    pub fn with_preview<R>(&self, f: impl FnOnce(Option<&RgbImage>) -> R) -> R {
        let guard = self.preview.lock().unwrap();
        f(guard.as_ref())
    }
}

/// UTC timestamp without an external chrono dependency
pub(crate) fn now_iso8601() -> String {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let mins = (time_secs % 3600) / 60;
    let s = time_secs % 60;

    let is_leap = |y: i64| y % 4 == 0 && (y % 100 != 0 || y % 400 == 0);

    let mut year = 1970i64;
    let mut remaining = days as i64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if remaining < days_in_year {
            break;
        }
        remaining -= days_in_year;
        year += 1;
    }

    let month_days = [
        31,
        if is_leap(year) { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0usize;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md as i64 {
            month = i;
            break;
        }
        remaining -= md as i64;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month + 1,
        remaining + 1,
        hours,
        mins,
        s
    )
}
