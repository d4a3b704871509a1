//! The generation session: one remote job from submission to persisted assets
//!
//! A session drives the whole lifecycle, from credential check through
//! submission, polling, materialization and persistence, as a single future
//! the host spawns. One job is in flight per session at a time; the
//! presentation layer reads `percentage_completed` (idle sentinel -1) and
//! may call `request_cancel` at any point.

use imaginarium_core::{ImaginariumError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{BlockadeClient, FetchService, StatusService, SubmissionService};
use crate::config::ImaginariumConfig;
use crate::field::GeneratorField;
use crate::job::{Job, JobContext, JobStatus, Stage, StateObserver};
use crate::persist::PersistenceSink;
use crate::pipeline::materialize;
use crate::poller::{poll_until_complete, ImagineResult, POLL_INTERVAL};

enum Target<'a> {
    Generator(&'a str),
    Skybox(i32),
}

pub struct GenerationSession {
    submission: Arc<dyn SubmissionService>,
    status: Arc<dyn StatusService>,
    fetch: Arc<dyn FetchService>,
    sink: PersistenceSink,
    api_key: String,
    poll_interval: Duration,
    ctx: Arc<JobContext>,
    /// Record of the most recent submitted job, replaced on each run
    job: Mutex<Option<Job>>,
}

impl GenerationSession {
    pub fn new(
        submission: Arc<dyn SubmissionService>,
        status: Arc<dyn StatusService>,
        fetch: Arc<dyn FetchService>,
        sink: PersistenceSink,
        api_key: &str,
    ) -> Self {
        Self {
            submission,
            status,
            fetch,
            sink,
            api_key: api_key.to_string(),
            poll_interval: POLL_INTERVAL,
            ctx: Arc::new(JobContext::new()),
            job: Mutex::new(None),
        }
    }

    /// Build a session talking to the real backend, configured from the
    /// layered config
    pub fn from_config(config: &ImaginariumConfig) -> Result<Self> {
        let client = Arc::new(match &config.api_url {
            Some(url) => BlockadeClient::with_base_url(url)?,
            None => BlockadeClient::new()?,
        });
        Ok(Self::new(
            client.clone(),
            client.clone(),
            client,
            PersistenceSink::new(config.save.clone()),
            &config.api_key,
        ))
    }

    pub fn with_observer(self, observer: Arc<dyn StateObserver>) -> Self {
        self.ctx.set_observer(observer);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Shared job state, for hosts that hold onto it across spawns
    pub fn context(&self) -> Arc<JobContext> {
        self.ctx.clone()
    }

    /// Current progress: -1 when idle, 0-100 while a job is active
    pub fn percentage_completed(&self) -> f32 {
        self.ctx.progress()
    }

    /// True when the session can accept a new submission
    pub fn is_idle(&self) -> bool {
        self.ctx.is_idle()
    }

    /// Request cooperative cancellation of the active job
    pub fn request_cancel(&self) {
        self.ctx.request_cancel();
    }

    /// The most recent submitted job's record, if any run got that far
    pub fn job(&self) -> Option<Job> {
        self.job.lock().unwrap().clone()
    }

    fn update_job(&self, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.job.lock().unwrap().as_mut() {
            f(job);
        }
    }

    /// Submit a generator job and drive it to completion
    pub async fn generate(&self, fields: &[GeneratorField], generator: &str) -> Result<()> {
        self.run(Target::Generator(generator), fields).await
    }

    /// Submit a skybox job for a style and drive it to completion
    pub async fn generate_skybox(&self, fields: &[GeneratorField], style_id: i32) -> Result<()> {
        self.run(Target::Skybox(style_id), fields).await
    }

    async fn run(&self, target: Target<'_>, fields: &[GeneratorField]) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ImaginariumError::MissingApiKey(
                "configure an API key before generating".to_string(),
            ));
        }

        self.ctx.reset_cancel();
        self.ctx.set_stage(Stage::Started);

        let submitted = match target {
            Target::Generator(generator) => {
                self.submission
                    .create_imagine(fields, generator, &self.api_key)
                    .await
            }
            Target::Skybox(style_id) => {
                self.submission
                    .create_skybox(fields, style_id, &self.api_key)
                    .await
            }
        };

        let job_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                // no job exists yet, so there is nothing to keep
                self.ctx.set_stage(Stage::Idle);
                return Err(e);
            }
        };

        if job_id.trim().is_empty() {
            tracing::warn!("Service returned no job id, nothing was submitted");
            self.ctx.set_stage(Stage::Idle);
            return Ok(());
        }

        *self.job.lock().unwrap() = Some(Job::new(&job_id));
        self.ctx.set_job_id(&job_id);
        self.ctx.set_stage(Stage::Polling);
        self.update_job(|job| job.status = JobStatus::InProgress);
        tracing::info!(job_id = %job_id, "Job submitted");

        let polled = poll_until_complete(
            self.status.as_ref(),
            &self.ctx,
            &self.api_key,
            self.poll_interval,
        )
        .await;

        match polled {
            Err(e) => {
                // the job id stays set; the caller decides whether to
                // retry or reset
                self.update_job(|job| job.status = JobStatus::Failed);
                Err(e)
            }
            Ok(None) => {
                // cancelled mid-poll: the idle state carries no residue
                self.update_job(|job| job.status = JobStatus::Cancelled);
                self.ctx.clear_preview();
                self.ctx.clear_job_id();
                Ok(())
            }
            Ok(Some(result)) => {
                let outcome = self.finish(&result).await;
                self.update_job(|job| {
                    job.status = if outcome.is_ok() {
                        JobStatus::Complete
                    } else {
                        JobStatus::Failed
                    };
                    if !result.texture_url.trim().is_empty() {
                        job.result_texture_url = Some(result.texture_url.clone());
                    }
                    if !result.prompt.is_empty() {
                        job.result_prompt = Some(result.prompt.clone());
                    }
                });
                // cleared even when materialization failed
                self.ctx.clear_job_id();
                outcome
            }
        }
    }

    async fn finish(&self, result: &ImagineResult) -> Result<()> {
        if result.texture_url.trim().is_empty() {
            // completed but empty: a valid terminal state, nothing to fetch
            self.ctx.set_stage(Stage::Saved);
            return Ok(());
        }

        let bundle = materialize(
            self.fetch.as_ref(),
            &self.ctx,
            &result.texture_url,
            &result.prompt,
        )
        .await?;

        self.ctx.install_preview(bundle.preview.clone());
        self.ctx.notify_assets_ready(&bundle);
        self.ctx.set_stage(Stage::Assigned);

        // persistence never fails the job
        if let Err(e) = self.sink.persist(&bundle) {
            tracing::warn!(error = %e, "Failed to persist assets");
        }

        self.ctx.set_stage(Stage::Saved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::IDLE_PROGRESS;
    use crate::persist::{SaveConfig, SaveFormat};
    use crate::pipeline::AssetBundle;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([180, 40, 40]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    struct MockSubmission {
        id: String,
        calls: AtomicUsize,
    }

    impl MockSubmission {
        fn with_id(id: &str) -> Self {
            Self {
                id: id.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SubmissionService for MockSubmission {
        async fn create_imagine(
            &self,
            _fields: &[GeneratorField],
            _generator: &str,
            _api_key: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.id.clone())
        }

        async fn create_skybox(
            &self,
            _fields: &[GeneratorField],
            _style_id: i32,
            _api_key: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.id.clone())
        }
    }

    struct ScriptedStatus {
        responses: Mutex<Vec<Result<HashMap<String, String>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStatus {
        fn new(responses: Vec<Result<HashMap<String, String>>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusService for ScriptedStatus {
        async fn get_imagine(
            &self,
            _imagine_id: &str,
            _api_key: &str,
        ) -> Result<HashMap<String, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(HashMap::new()))
        }
    }

    struct RecordingFetch {
        urls: Mutex<Vec<String>>,
        bytes: Vec<u8>,
    }

    impl RecordingFetch {
        fn new() -> Self {
            Self {
                urls: Mutex::new(Vec::new()),
                bytes: png_bytes(64, 64),
            }
        }

        fn garbage() -> Self {
            Self {
                urls: Mutex::new(Vec::new()),
                bytes: b"definitely not an image".to_vec(),
            }
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FetchService for RecordingFetch {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.bytes.clone())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        percents: Mutex<Vec<f32>>,
        bundles: AtomicUsize,
    }

    impl StateObserver for RecordingObserver {
        fn on_stage(&self, _stage: Stage, percent: f32) {
            self.percents.lock().unwrap().push(percent);
        }

        fn on_assets_ready(&self, _bundle: &AssetBundle) {
            self.bundles.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "imaginarium_session_test_{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn images_only_sink(dir: &PathBuf) -> PersistenceSink {
        PersistenceSink::new(SaveConfig {
            save_as_assets: false,
            save_as_images: true,
            format: SaveFormat::Jpeg,
            directory: dir.join("out"),
            store_root: dir.join("store"),
        })
    }

    fn disabled_sink() -> PersistenceSink {
        PersistenceSink::new(SaveConfig {
            save_as_assets: false,
            save_as_images: false,
            format: SaveFormat::Jpeg,
            directory: PathBuf::from("unused"),
            store_root: PathBuf::from("unused"),
        })
    }

    fn complete_payload(url: &str, prompt: &str) -> HashMap<String, String> {
        HashMap::from([
            ("textureUrl".to_string(), url.to_string()),
            ("prompt".to_string(), prompt.to_string()),
        ])
    }

    #[tokio::test]
    async fn test_blank_api_key_fails_without_submitting() {
        let submission = Arc::new(MockSubmission::with_id("obf-1"));
        let session = GenerationSession::new(
            submission.clone(),
            Arc::new(ScriptedStatus::new(vec![])),
            Arc::new(RecordingFetch::new()),
            disabled_sink(),
            "   ",
        );

        let err = session.generate(&[], "stable").await.unwrap_err();
        assert!(matches!(err, ImaginariumError::MissingApiKey(_)));
        assert_eq!(submission.calls(), 0);
        assert_eq!(session.percentage_completed(), IDLE_PROGRESS);
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_empty_job_id_is_a_noop() {
        let status = Arc::new(ScriptedStatus::new(vec![]));
        let session = GenerationSession::new(
            Arc::new(MockSubmission::with_id("")),
            status.clone(),
            Arc::new(RecordingFetch::new()),
            disabled_sink(),
            "key",
        );

        session.generate(&[], "stable").await.unwrap();
        assert_eq!(status.calls(), 0);
        assert_eq!(session.percentage_completed(), IDLE_PROGRESS);
        assert!(session.context().job_id().is_empty());
        // nothing was submitted, so no job record exists
        assert!(session.job().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_generation() {
        let dir = temp_dir();
        let status = Arc::new(ScriptedStatus::new(vec![
            Ok(HashMap::new()),
            Ok(HashMap::new()),
            Ok(complete_payload("https://x/images/1.png", "a red castle")),
        ]));
        let fetch = Arc::new(RecordingFetch::new());
        let observer = Arc::new(RecordingObserver::default());

        let session = GenerationSession::new(
            Arc::new(MockSubmission::with_id("obf-1")),
            status.clone(),
            fetch.clone(),
            images_only_sink(&dir),
            "key",
        )
        .with_observer(observer.clone());

        session.generate(&[], "stable").await.unwrap();

        assert_eq!(status.calls(), 3);
        assert_eq!(
            fetch.urls(),
            vec!["https://x/images/1.png", "https://x/depths/1.png"]
        );

        let out = dir.join("out");
        assert!(out.join("a_red_castle_texture.jpg").exists());
        assert!(out.join("a_red_castle_texture_depth.jpg").exists());

        assert_eq!(session.percentage_completed(), 100.0);
        assert!(session.context().job_id().is_empty());
        session.context().with_preview(|p| {
            assert_eq!(p.unwrap().width(), 128);
        });

        assert_eq!(observer.bundles.load(Ordering::SeqCst), 1);
        let percents = observer.percents.lock().unwrap().clone();
        assert_eq!(percents, vec![1.0, 33.0, 66.0, 80.0, 90.0, 100.0]);

        let job = session.job().unwrap();
        assert_eq!(job.id, "obf-1");
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(
            job.result_texture_url.as_deref(),
            Some("https://x/images/1.png")
        );
        assert_eq!(job.result_prompt.as_deref(), Some("a red castle"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_issues_no_query() {
        let status = Arc::new(ScriptedStatus::new(vec![]));
        let session = Arc::new(GenerationSession::new(
            Arc::new(MockSubmission::with_id("obf-1")),
            status.clone(),
            Arc::new(RecordingFetch::new()),
            disabled_sink(),
            "key",
        ));

        let runner = session.clone();
        let handle = tokio::spawn(async move { runner.generate(&[], "stable").await });

        // let the job reach its first wait, then cancel mid-wait
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        session.request_cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(status.calls(), 0);
        assert_eq!(session.percentage_completed(), IDLE_PROGRESS);
        assert!(session.context().job_id().is_empty());
        session.context().with_preview(|p| assert!(p.is_none()));
        assert_eq!(session.job().unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_error_leaves_job_id_set() {
        let status = Arc::new(ScriptedStatus::new(vec![Err(
            ImaginariumError::ServiceError("503".to_string()),
        )]));
        let session = GenerationSession::new(
            Arc::new(MockSubmission::with_id("obf-1")),
            status,
            Arc::new(RecordingFetch::new()),
            disabled_sink(),
            "key",
        );

        let err = session.generate(&[], "stable").await.unwrap_err();
        assert!(matches!(err, ImaginariumError::ServiceError(_)));
        // the caller decides whether to retry or reset
        assert_eq!(session.context().job_id(), "obf-1");
        assert_eq!(session.percentage_completed(), 33.0);
        assert_eq!(session.job().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_is_fatal_but_clears_job_id() {
        let status = Arc::new(ScriptedStatus::new(vec![Ok(complete_payload(
            "https://x/images/1.png",
            "a red castle",
        ))]));
        let session = GenerationSession::new(
            Arc::new(MockSubmission::with_id("obf-1")),
            status,
            Arc::new(RecordingFetch::garbage()),
            disabled_sink(),
            "key",
        );

        let err = session.generate(&[], "stable").await.unwrap_err();
        assert!(matches!(err, ImaginariumError::DecodeError(_)));
        assert!(session.context().job_id().is_empty());
        assert_eq!(session.job().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_job_with_blank_url_finishes_clean() {
        let status = Arc::new(ScriptedStatus::new(vec![Ok(HashMap::from([(
            "prompt".to_string(),
            "a red castle".to_string(),
        )]))]));
        let fetch = Arc::new(RecordingFetch::new());
        let session = GenerationSession::new(
            Arc::new(MockSubmission::with_id("obf-1")),
            status,
            fetch.clone(),
            disabled_sink(),
            "key",
        );

        session.generate(&[], "stable").await.unwrap();
        assert!(fetch.urls().is_empty());
        assert_eq!(session.percentage_completed(), 100.0);
        assert!(session.context().job_id().is_empty());

        let job = session.job().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.result_texture_url.is_none());
        assert_eq!(job.result_prompt.as_deref(), Some("a red castle"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skybox_submission_path() {
        let submission = Arc::new(MockSubmission::with_id("obf-sky"));
        let status = Arc::new(ScriptedStatus::new(vec![Ok(HashMap::from([(
            "prompt".to_string(),
            "dusk".to_string(),
        )]))]));
        let session = GenerationSession::new(
            submission.clone(),
            status,
            Arc::new(RecordingFetch::new()),
            disabled_sink(),
            "key",
        );

        let fields = crate::field::build_skybox_style_fields();
        session.generate_skybox(&fields, 5).await.unwrap();
        assert_eq!(submission.calls(), 1);
        assert_eq!(session.percentage_completed(), 100.0);
    }
}
