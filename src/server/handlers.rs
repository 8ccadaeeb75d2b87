// Tab service request handlers

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::error::{ApiError, ApiResult};
use super::sse::json_event_stream;
use super::upload::read_audio_upload;
use super::AppState;
use crate::fretboard::{render_ascii, TabEvent};

/// `POST /process-audio`: run the pipeline and stream its progress
///
/// Upload problems are answered with 400 before the stream starts; after
/// that every failure is reported in-band on the terminal event.
pub async fn process_audio(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let upload = read_audio_upload(multipart).await?;
    log::info!(
        "Processing '{}' ({} bytes)",
        upload.filename,
        upload.data.len()
    );

    let progress = state
        .orchestrator
        .run(upload.data.to_vec(), upload.filename);
    Ok(json_event_stream(progress))
}

/// `POST /render-tab`: render tab events as ASCII tablature
pub async fn render_tab(
    State(state): State<AppState>,
    Json(events): Json<Vec<TabEvent>>,
) -> ApiResult<Response> {
    if let Some((index, event)) = events.iter().enumerate().find(|(_, e)| !e.is_well_formed()) {
        return Err(ApiError::bad_request(format!(
            "Tab event {} has {} strings but {} frets",
            index,
            event.strings.len(),
            event.frets.len()
        )));
    }

    let text = render_ascii(&events, &state.tuning);
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
