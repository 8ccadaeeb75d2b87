// Separation service
// HTTP front end for a source-separation tool: /separate, /download/{file_id}, /health

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::protocol::SeparationEvent;
use crate::config::AppConfig;
use crate::pipeline::sanitized_extension;
use crate::server::{json_event_stream, read_audio_upload, ApiError, ApiResult};

/// Separator progress once the model is running
const SEPARATING_PERCENT: u8 = 40;

/// Heartbeat progress never passes this while separation is pending
const HEARTBEAT_PERCENT_CEILING: u8 = 90;

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum StemError {
    #[error("FFmpeg is not installed or not in PATH.")]
    MissingFfmpeg,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Separation failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Separation produced no output")]
    NoOutput,

    /// The client disconnected before the job finished
    #[error("Separation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source-separation engine that isolates the guitar stem
#[async_trait]
pub trait StemSeparator: Send + Sync {
    /// Model identifier shown in progress messages
    fn model_name(&self) -> &str;

    /// Verify external prerequisites before any work starts
    fn check_dependencies(&self) -> Result<(), StemError>;

    /// Separate `input` into `output_dir`, returning the produced stems
    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StemError>;
}

/// Runs the `audio-separator` command line tool
#[derive(Debug, Clone)]
pub struct CommandStemSeparator {
    program: String,
    model: String,
}

impl CommandStemSeparator {
    pub fn new(program: impl Into<String>, model: impl Into<String>) -> Self {
        CommandStemSeparator {
            program: program.into(),
            model: model.into(),
        }
    }

    fn arguments(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        vec![
            input.to_string_lossy().into_owned(),
            "--model_filename".to_string(),
            self.model.clone(),
            "--output_dir".to_string(),
            output_dir.to_string_lossy().into_owned(),
            "--single_stem".to_string(),
            "Guitar".to_string(),
            "--output_format".to_string(),
            "WAV".to_string(),
        ]
    }
}

#[async_trait]
impl StemSeparator for CommandStemSeparator {
    fn model_name(&self) -> &str {
        self.model.trim_end_matches(".yaml")
    }

    fn check_dependencies(&self) -> Result<(), StemError> {
        find_on_path("ffmpeg").map(|_| ()).ok_or(StemError::MissingFfmpeg)
    }

    async fn separate(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StemError> {
        log::info!("Running {} on {}", self.program, input.display());
        let output = Command::new(&self.program)
            .args(self.arguments(input, output_dir))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StemError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StemError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        list_files(output_dir).await
    }
}

/// A separated stem waiting to be downloaded
#[derive(Debug, Clone)]
struct PendingDownload {
    path: PathBuf,
    created_at: DateTime<Utc>,
}

/// Shared state of the separation service
pub struct StemService {
    separator: Arc<dyn StemSeparator>,
    uploads_dir: PathBuf,
    output_dir: PathBuf,
    downloads_dir: PathBuf,
    heartbeat_interval: Duration,
    downloads: Mutex<HashMap<Uuid, PendingDownload>>,
}

impl StemService {
    pub fn new(separator: Arc<dyn StemSeparator>, work_dir: &Path) -> Self {
        let stems = work_dir.join("stems");
        StemService {
            separator,
            uploads_dir: stems.join("uploads"),
            output_dir: stems.join("output"),
            downloads_dir: stems.join("downloads"),
            heartbeat_interval: Duration::from_secs(15),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let separator =
            CommandStemSeparator::new(config.separator_bin.clone(), config.separator_model.clone());
        StemService::new(Arc::new(separator), &config.work_dir)
            .with_heartbeat_interval(config.heartbeat_interval)
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Create the service's working directories
    pub async fn prepare(&self) -> std::io::Result<()> {
        for dir in [&self.uploads_dir, &self.output_dir, &self.downloads_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub async fn pending_downloads(&self) -> usize {
        self.downloads.lock().await.len()
    }

    /// Separate one stored upload, reporting progress on `events`
    ///
    /// The upload and the job's scratch directory are removed on every
    /// path. The last event is either a completion carrying the file id or
    /// an error.
    async fn run_job(self: Arc<Self>, input: PathBuf, events: mpsc::Sender<SeparationEvent>) {
        let job_id = Uuid::new_v4();
        let job_dir = self.output_dir.join(job_id.to_string());

        let outcome = self.separate_job(&input, &job_dir, &events).await;

        remove_path(&input).await;
        remove_path(&job_dir).await;

        let terminal = match outcome {
            Ok(file_id) => {
                log::info!("Separation complete, file_id={}", file_id);
                SeparationEvent::complete(file_id.to_string())
            }
            Err(StemError::Cancelled) => {
                log::info!("Separation of {} cancelled by client", input.display());
                return;
            }
            Err(e) => {
                log::error!("Separation of {} failed: {}", input.display(), e);
                SeparationEvent::error(e.to_string())
            }
        };
        let _ = events.send(terminal).await;
    }

    async fn separate_job(
        &self,
        input: &Path,
        job_dir: &Path,
        events: &mpsc::Sender<SeparationEvent>,
    ) -> Result<Uuid, StemError> {
        let send = move |message: String, progress: u8| async move {
            events
                .send(SeparationEvent::progress(message, progress))
                .await
                .map_err(|_| StemError::Cancelled)
        };

        send("Checking dependencies...".to_string(), 5).await?;
        self.separator.check_dependencies()?;

        send("Configuring audio separator...".to_string(), 10).await?;
        tokio::fs::create_dir_all(job_dir).await?;

        send(
            format!("Loading ML model ({})...", self.separator.model_name()),
            20,
        )
        .await?;

        send(
            "Separating guitar audio (this may take a few minutes)...".to_string(),
            SEPARATING_PERCENT,
        )
        .await?;

        let started = Instant::now();
        let mut heartbeat =
            tokio::time::interval_at(started + self.heartbeat_interval, self.heartbeat_interval);
        let mut ticks: u8 = 0;
        let separation = self.separator.separate(input, job_dir);
        tokio::pin!(separation);

        let stems = loop {
            tokio::select! {
                result = &mut separation => break result?,
                _ = heartbeat.tick() => {
                    ticks = ticks.saturating_add(1);
                    let progress = SEPARATING_PERCENT
                        .saturating_add(ticks)
                        .min(HEARTBEAT_PERCENT_CEILING);
                    let message = format!(
                        "Separating guitar audio... ({}s elapsed)",
                        started.elapsed().as_secs()
                    );
                    send(message, progress).await?;
                }
                _ = events.closed() => return Err(StemError::Cancelled),
            }
        };

        let stem = stems.first().ok_or(StemError::NoOutput)?;
        let file_id = Uuid::new_v4();
        let destination = self.downloads_dir.join(format!("{}.wav", file_id));
        move_file(stem, &destination).await?;

        self.downloads.lock().await.insert(
            file_id,
            PendingDownload {
                path: destination,
                created_at: Utc::now(),
            },
        );
        Ok(file_id)
    }

    /// Remove a pending download from the registry
    async fn take_download(&self, file_id: &Uuid) -> Option<PathBuf> {
        self.downloads
            .lock()
            .await
            .remove(file_id)
            .map(|pending| pending.path)
    }

    /// Delete stems that were not fetched within `ttl`
    pub async fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let expired: Vec<PathBuf> = {
            let mut downloads = self.downloads.lock().await;
            let ids: Vec<Uuid> = downloads
                .iter()
                .filter(|(_, pending)| now - pending.created_at >= ttl)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| downloads.remove(id))
                .map(|pending| pending.path)
                .collect()
        };

        for path in &expired {
            log::info!("Removing unclaimed stem {}", path.display());
            remove_path(path).await;
        }
        expired.len()
    }
}

/// Periodically delete stems nobody downloaded
pub fn spawn_download_sweeper(service: Arc<StemService>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = service.sweep_expired(Utc::now(), ttl).await;
            if removed > 0 {
                log::debug!("Swept {} expired stems", removed);
            }
        }
    })
}

/// Build the separation service router
pub fn router(service: Arc<StemService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/separate", post(separate))
        .route("/download/{file_id}", get(download))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn separate(
    State(service): State<Arc<StemService>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let upload = read_audio_upload(multipart).await?;
    log::info!("Received '{}' for separation", upload.filename);

    let extension = sanitized_extension(&upload.filename).unwrap_or_else(|| "bin".to_string());
    tokio::fs::create_dir_all(&service.uploads_dir).await?;
    let input = service
        .uploads_dir
        .join(format!("{}.{}", Uuid::new_v4(), extension));
    tokio::fs::write(&input, &upload.data).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(Arc::clone(&service).run_job(input, tx));

    let events = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });
    Ok(json_event_stream(events))
}

async fn download(
    State(service): State<Arc<StemService>>,
    UrlPath(file_id): UrlPath<String>,
) -> ApiResult<Response> {
    let id = Uuid::parse_str(&file_id).map_err(|_| ApiError::not_found("File not found"))?;
    let path = service
        .take_download(&id)
        .await
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            log::warn!("Registered stem {} is unreadable: {}", path.display(), e);
            return Err(ApiError::not_found("File not found"));
        }
    };
    let length = file.metadata().await.map(|m| m.len()).ok();

    // Deleted once the body has been sent or the client goes away
    let guard = RemoveOnDrop(path);
    let body = ReaderStream::new(file).map(move |chunk| {
        let _guard = &guard;
        chunk
    });

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.wav\"", id),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response();
    if let Some(length) = length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, length.into());
    }
    Ok(response)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => log::debug!("Removed downloaded stem {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.0.display(), e),
        }
    }
}

/// Locate an executable on PATH
fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{}.exe", program));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StemError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Different filesystems
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{data_lines, spawn_app};
    use tempfile::TempDir;

    struct FakeSeparator {
        delay: Duration,
        produce: bool,
    }

    #[async_trait]
    impl StemSeparator for FakeSeparator {
        fn model_name(&self) -> &str {
            "fake"
        }

        fn check_dependencies(&self) -> Result<(), StemError> {
            Ok(())
        }

        async fn separate(&self, _input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StemError> {
            tokio::time::sleep(self.delay).await;
            if !self.produce {
                return Ok(Vec::new());
            }
            let stem = output_dir.join("input_(Guitar).wav");
            tokio::fs::write(&stem, b"RIFF").await?;
            Ok(vec![stem])
        }
    }

    fn service(temp_dir: &TempDir, separator: FakeSeparator) -> Arc<StemService> {
        Arc::new(
            StemService::new(Arc::new(separator), temp_dir.path())
                .with_heartbeat_interval(Duration::from_millis(20)),
        )
    }

    async fn run_to_end(service: &Arc<StemService>, input: PathBuf) -> Vec<SeparationEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        Arc::clone(service).run_job(input, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_command_arguments() {
        let separator = CommandStemSeparator::new("audio-separator", "htdemucs_6s.yaml");
        let args = separator.arguments(Path::new("/in/song.wav"), Path::new("/out"));
        assert_eq!(args[0], "/in/song.wav");
        assert!(args.windows(2).any(|w| w[0] == "--single_stem" && w[1] == "Guitar"));
        assert!(args.windows(2).any(|w| w[0] == "--model_filename" && w[1] == "htdemucs_6s.yaml"));
        assert_eq!(separator.model_name(), "htdemucs_6s");
    }

    #[test]
    fn test_missing_ffmpeg_message() {
        assert_eq!(
            StemError::MissingFfmpeg.to_string(),
            "FFmpeg is not installed or not in PATH."
        );
    }

    #[tokio::test]
    async fn test_job_success_registers_download() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::from_millis(70), produce: true });
        service.prepare().await.unwrap();
        let input = service.uploads_dir.join("upload.wav");
        std::fs::write(&input, b"audio").unwrap();

        let events = run_to_end(&service, input.clone()).await;

        let last = events.last().unwrap();
        let file_id = last.file_id.clone().unwrap();
        assert_eq!(last.progress, Some(100));
        assert!(events.iter().any(|e| e
            .message
            .as_deref()
            .is_some_and(|m| m.contains("elapsed"))));
        let heartbeat_max = events[..events.len() - 1]
            .iter()
            .filter_map(|e| e.progress)
            .max()
            .unwrap();
        assert!(heartbeat_max <= HEARTBEAT_PERCENT_CEILING);

        assert!(!input.exists());
        assert!(service.downloads_dir().join(format!("{}.wav", file_id)).exists());
        assert_eq!(service.pending_downloads().await, 1);
    }

    #[tokio::test]
    async fn test_job_without_output_reports_error() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::ZERO, produce: false });
        service.prepare().await.unwrap();
        let input = service.uploads_dir.join("upload.wav");
        std::fs::write(&input, b"audio").unwrap();

        let events = run_to_end(&service, input.clone()).await;

        assert_eq!(
            events.last().unwrap().error.as_deref(),
            Some("Separation produced no output")
        );
        assert!(!input.exists());
        assert_eq!(service.pending_downloads().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::ZERO, produce: true });
        service.prepare().await.unwrap();

        let now = Utc::now();
        let old = service.downloads_dir().join("old.wav");
        let fresh = service.downloads_dir().join("fresh.wav");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&fresh, b"fresh").unwrap();
        {
            let mut downloads = service.downloads.lock().await;
            downloads.insert(
                Uuid::new_v4(),
                PendingDownload { path: old.clone(), created_at: now - chrono::Duration::hours(2) },
            );
            downloads.insert(
                Uuid::new_v4(),
                PendingDownload { path: fresh.clone(), created_at: now },
            );
        }

        let removed = service.sweep_expired(now, Duration::from_secs(3600)).await;

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert_eq!(service.pending_downloads().await, 1);
    }

    #[test]
    fn test_remove_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stem.wav");
        std::fs::write(&path, b"data").unwrap();

        drop(RemoveOnDrop(path.clone()));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_download_unknown_id_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::ZERO, produce: true });
        let base = spawn_app(router(service, 1024 * 1024)).await;

        for id in [Uuid::new_v4().to_string(), "../../etc/passwd".to_string(), "nope".to_string()] {
            let response = reqwest::get(format!("{}/download/{}", base, id)).await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_separate_then_download_once() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::ZERO, produce: true });
        service.prepare().await.unwrap();
        let base = spawn_app(router(Arc::clone(&service), 1024 * 1024)).await;
        let client = reqwest::Client::new();

        let form = reqwest::multipart::Form::new().part(
            "audio_file",
            reqwest::multipart::Part::bytes(b"audio".to_vec()).file_name("mix.flac"),
        );
        let body = client
            .post(format!("{}/separate", base))
            .multipart(form)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let events: Vec<SeparationEvent> = data_lines(&body);
        assert_eq!(events[0].progress, Some(5));
        assert_eq!(events[0].message.as_deref(), Some("Checking dependencies..."));
        let file_id = events.last().unwrap().file_id.clone().unwrap();

        let response = client
            .get(format!("{}/download/{}", base, file_id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"RIFF");

        let stored = service.downloads_dir().join(format!("{}.wav", file_id));
        for _ in 0..100 {
            if !stored.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!stored.exists());

        let again = client
            .get(format!("{}/download/{}", base, file_id))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_separate_without_file_is_bad_request() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir, FakeSeparator { delay: Duration::ZERO, produce: true });
        let base = spawn_app(router(service, 1024 * 1024)).await;

        let response = reqwest::Client::new()
            .post(format!("{}/separate", base))
            .multipart(reqwest::multipart::Form::new().text("other", "x"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "No file part");
    }
}
