// HTTP server module
// Routes of the tab service and the pieces shared with the separation service

pub mod error;
pub mod handlers;
pub mod sse;
pub mod upload;

pub use error::{ApiError, ApiResult};
pub use sse::json_event_stream;
pub use upload::{read_audio_upload, AudioUpload, AUDIO_FIELD};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::fretboard::Tuning;
use crate::pipeline::PipelineOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub tuning: Tuning,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        AppState {
            orchestrator,
            tuning: Tuning::standard(),
        }
    }
}

/// Build the tab service router
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/process-audio", post(handlers::process_audio))
        .route("/render-tab", post(handlers::render_tab))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fretboard::FretboardMapper;
    use crate::pipeline::PipelineProgress;
    use crate::separation::{self, HttpSeparationClient, StemError, StemSeparator, StemService};
    use crate::testing::{data_lines, spawn_app, write_wav, FakeTranscriber};
    use crate::transcription::GridQuantizer;
    use async_trait::async_trait;
    use reqwest::multipart::{Form, Part};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stem separator that emits a silent guitar stem
    struct SilentStems;

    #[async_trait]
    impl StemSeparator for SilentStems {
        fn model_name(&self) -> &str {
            "silent"
        }

        fn check_dependencies(&self) -> Result<(), StemError> {
            Ok(())
        }

        async fn separate(&self, _input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, StemError> {
            let stem = output_dir.join("input_(Guitar).wav");
            write_wav(&stem);
            Ok(vec![stem])
        }
    }

    fn tab_app(temp_dir: &TempDir, separator_url: &str) -> Router {
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(HttpSeparationClient::new(separator_url).unwrap()),
            Arc::new(FakeTranscriber { fail: false }),
            Arc::new(GridQuantizer::default()),
            FretboardMapper::default(),
            temp_dir.path().join("runs"),
        )
        .with_heartbeat_interval(Duration::from_secs(1));
        router(AppState::new(Arc::new(orchestrator)), 10 * 1024 * 1024)
    }

    fn audio_form(filename: &str, data: &[u8]) -> Form {
        Form::new().part(
            AUDIO_FIELD,
            Part::bytes(data.to_vec()).file_name(filename.to_string()),
        )
    }

    #[tokio::test]
    async fn test_health() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, "http://127.0.0.1:1")).await;

        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_missing_file_part_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, "http://127.0.0.1:1")).await;

        let form = Form::new().text("comment", "no audio here");
        let response = reqwest::Client::new()
            .post(format!("{}/process-audio", base))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "No file part");
    }

    #[tokio::test]
    async fn test_empty_filename_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, "http://127.0.0.1:1")).await;

        let response = reqwest::Client::new()
            .post(format!("{}/process-audio", base))
            .multipart(audio_form("", b"data"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "No selected file");
        assert!(!temp_dir.path().join("runs").exists());
    }

    #[tokio::test]
    async fn test_render_tab() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, "http://127.0.0.1:1")).await;

        let events = serde_json::json!([
            {"time": 0.0, "duration": 1.0, "strings": [6, 5, 4], "frets": [0, 2, 2]}
        ]);
        let text = reqwest::Client::new()
            .post(format!("{}/render-tab", base))
            .json(&events)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "e|---");
        assert_eq!(lines[5], "E|-0-");
    }

    #[tokio::test]
    async fn test_render_tab_rejects_mismatched_arrays() {
        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, "http://127.0.0.1:1")).await;

        let events = serde_json::json!([
            {"time": 0.0, "duration": 1.0, "strings": [6, 5, 4], "frets": [0, 2, 2]},
            {"time": 1.0, "duration": 1.0, "strings": [1, 2], "frets": [3]}
        ]);
        let response = reqwest::Client::new()
            .post(format!("{}/render-tab", base))
            .json(&events)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Tab event 1 has 2 strings but 1 frets");
    }

    #[tokio::test]
    async fn test_unreachable_separator_is_reported_in_stream() {
        let temp_dir = TempDir::new().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let base = spawn_app(tab_app(&temp_dir, &format!("http://127.0.0.1:{}", port))).await;

        let response = reqwest::Client::new()
            .post(format!("{}/process-audio", base))
            .multipart(audio_form("song.wav", b"audio"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let events: Vec<PipelineProgress> = data_lines(&response.text().await.unwrap());
        let terminal = events.last().unwrap();
        assert!(terminal
            .error
            .as_deref()
            .unwrap()
            .starts_with("Separation service unavailable"));
        assert_eq!(terminal.stage, 2);
    }

    #[tokio::test]
    async fn test_end_to_end_with_separation_service() {
        let stems_dir = TempDir::new().unwrap();
        let stem_service = Arc::new(StemService::new(Arc::new(SilentStems), stems_dir.path()));
        stem_service.prepare().await.unwrap();
        let separator_url = spawn_app(separation::router(Arc::clone(&stem_service), 10 * 1024 * 1024)).await;

        let temp_dir = TempDir::new().unwrap();
        let base = spawn_app(tab_app(&temp_dir, &separator_url)).await;

        let response = reqwest::Client::new()
            .post(format!("{}/process-audio", base))
            .multipart(audio_form("take one.mp3", b"not really an mp3"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "text/event-stream"
        );

        let events: Vec<PipelineProgress> = data_lines(&response.text().await.unwrap());
        for pair in events.windows(2) {
            assert!(pair[0].progress_percent <= pair[1].progress_percent);
        }

        let terminal = events.last().unwrap();
        assert!(terminal.error.is_none(), "run failed: {:?}", terminal.error);
        let tab = terminal.result.as_ref().unwrap();
        assert_eq!(tab[0].strings, vec![6, 5, 4]);
        assert_eq!(tab[0].frets, vec![0, 2, 2]);

        let leftover_runs = std::fs::read_dir(temp_dir.path().join("runs")).unwrap().count();
        assert_eq!(leftover_runs, 0);
        assert_eq!(stem_service.pending_downloads().await, 0);
    }
}
