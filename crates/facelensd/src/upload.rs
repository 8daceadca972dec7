//! Transient upload files.
//!
//! An [`Upload`] owns its file: dropping it removes the file, so every exit
//! path of a handler (including client disconnects) leaves the upload
//! directory clean.

use axum::extract::multipart::{Multipart, MultipartError};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("missing multipart file field `{IMAGE_FIELD}`")]
    MissingField,
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Upload {
    file: NamedTempFile,
    request_id: Uuid,
    size: u64,
}

impl Upload {
    /// Stream the `image` field of `multipart` into a new file under `dir`.
    ///
    /// Other fields are skipped.
    pub async fn receive(multipart: &mut Multipart, dir: &Path) -> Result<Self, UploadError> {
        while let Some(mut field) = multipart.next_field().await? {
            if field.name() != Some(IMAGE_FIELD) {
                continue;
            }

            let request_id = Uuid::new_v4();
            let file = tempfile::Builder::new()
                .prefix(&format!("upload-{request_id}-"))
                .tempfile_in(dir)?;
            let mut out = tokio::fs::File::from_std(file.reopen()?);

            let mut size = 0u64;
            while let Some(chunk) = field.chunk().await? {
                out.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            out.flush().await?;

            tracing::debug!(
                %request_id,
                size,
                file_name = field.file_name().unwrap_or_default(),
                path = %file.path().display(),
                "upload stored"
            );

            return Ok(Self {
                file,
                request_id,
                size,
            });
        }

        Err(UploadError::MissingField)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the file now, logging the outcome. A file that is already gone is not an error.
    pub fn discard(self) {
        let path = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "upload removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "upload already removed")
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove upload"),
        }
    }
}
