// Multipart upload handling
// Both services accept the audio under the same form field

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::Multipart;

use super::error::ApiError;
use crate::pipeline::{validate_upload, PipelineError};

/// Form field carrying the audio file
pub const AUDIO_FIELD: &str = "audio_file";

#[derive(Debug)]
pub struct AudioUpload {
    pub filename: String,
    pub data: Bytes,
}

/// Pull the `audio_file` part out of a multipart request
///
/// A request that is not multipart at all counts as a missing file part.
pub async fn read_audio_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<AudioUpload, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        log::debug!("Rejected upload body: {}", rejection);
        PipelineError::no_file()
    })?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        validate_upload(Some(&filename), &data)?;
        return Ok(AudioUpload { filename, data });
    }

    Err(PipelineError::no_file().into())
}
