// Separation service client
// Uploads a mix, relays the service's progress, and fetches the guitar stem

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use super::protocol::{SeparationEvent, SseDecoder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SeparationError {
    /// Network-level failure reaching the service
    #[error("{0}")]
    Unavailable(String),

    /// The service answered with an explicit error payload
    #[error("{0}")]
    Rejected(String),

    /// The service finished without a usable result
    #[error("{0}")]
    NoOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Progress reported by the separation service while it works
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationUpdate {
    /// The service's own progress [0, 100]
    pub percent: u8,
    pub message: String,
}

/// Isolates the guitar track of a mixed recording
#[async_trait]
pub trait SeparationClient: Send + Sync {
    /// Submit `audio` and wait for the separated result's handle
    ///
    /// Intermediate progress is pushed to `updates`; a closed receiver is
    /// not an error.
    async fn separate(
        &self,
        audio: &Path,
        updates: mpsc::Sender<SeparationUpdate>,
    ) -> Result<String, SeparationError>;

    /// Fetch a separated result by handle into `destination`
    async fn download(&self, file_id: &str, destination: &Path) -> Result<(), SeparationError>;
}

/// Client for the HTTP separation service (`/separate`, `/download/{file_id}`)
#[derive(Debug, Clone)]
pub struct HttpSeparationClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSeparationClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SeparationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tabforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SeparationError::Unavailable(e.to_string()))?;
        Ok(HttpSeparationClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn relay_event(
        event: SeparationEvent,
        updates: &mpsc::Sender<SeparationUpdate>,
    ) -> Option<Result<String, SeparationError>> {
        if let Some(error) = event.error {
            return Some(Err(SeparationError::Rejected(error)));
        }
        if let Some(file_id) = event.file_id {
            return Some(Ok(file_id));
        }
        if let Some(percent) = event.progress {
            let update = SeparationUpdate {
                percent,
                message: event.message.unwrap_or_default(),
            };
            // Receiver gone means nobody is listening any more; keep going.
            let _ = updates.send(update).await;
        }
        None
    }
}

#[async_trait]
impl SeparationClient for HttpSeparationClient {
    async fn separate(
        &self,
        audio: &Path,
        updates: mpsc::Sender<SeparationUpdate>,
    ) -> Result<String, SeparationError> {
        let bytes = tokio::fs::read(audio).await?;
        let filename = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let form = reqwest::multipart::Form::new().part(
            "audio_file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        );

        let url = format!("{}/separate", self.base_url);
        log::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SeparationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let rejected = response
                .json::<SeparationEvent>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("Separation service returned {}", status));
            return Err(SeparationError::Rejected(rejected));
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| SeparationError::Unavailable(e.to_string()))?;
            for event in decoder.push(&chunk) {
                match event {
                    Ok(event) => {
                        if let Some(outcome) = Self::relay_event(event, &updates).await {
                            return outcome;
                        }
                    }
                    Err(e) => log::warn!("Skipping malformed separation event: {}", e),
                }
            }
        }

        if let Some(Ok(event)) = decoder.finish() {
            if let Some(outcome) = Self::relay_event(event, &updates).await {
                return outcome;
            }
        }

        Err(SeparationError::NoOutput(
            "Separation stream ended without a result".to_string(),
        ))
    }

    async fn download(&self, file_id: &str, destination: &Path) -> Result<(), SeparationError> {
        let url = format!("{}/download/{}", self.base_url, file_id);
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SeparationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SeparationError::NoOutput(format!(
                "Separated file {} not available ({})",
                file_id, status
            )));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| SeparationError::Unavailable(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}
