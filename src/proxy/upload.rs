//! Multipart upload persistence for `/prepare-data`.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Name of the multipart field carrying the file.
const FILE_FIELD: &str = "file";

/// A file written to the upload directory.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    /// Filename the client sent, used when forwarding to the provider.
    pub original_name: String,
    pub size: u64,
}

/// `<unix-millis>-<uuid><.ext>`, keeping the original extension when it is plain.
pub fn generated_file_name(original: Option<&str>) -> String {
    let extension = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    )
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}

async fn write_field(field: &mut Field<'_>, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(size)
}

/// Stream the single `file` field of `multipart` into `dir`.
///
/// Other fields are skipped. A missing or repeated `file` field is an upload
/// error, and nothing is left on disk when the request fails.
pub async fn store_upload(mut multipart: Multipart, dir: &Path) -> Result<StoredUpload> {
    tokio::fs::create_dir_all(dir).await?;
    let mut stored: Option<StoredUpload> = None;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                if let Some(upload) = &stored {
                    discard(&upload.path).await;
                }
                return Err(e.into());
            }
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        if let Some(upload) = stored.take() {
            discard(&upload.path).await;
            return Err(Error::Upload(
                "Only one file may be uploaded per request".to_string(),
            ));
        }

        let original_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        let path = dir.join(generated_file_name(Some(&original_name)));

        match write_field(&mut field, &path).await {
            Ok(size) => {
                tracing::debug!(path = %path.display(), bytes = size, "Stored upload");
                stored = Some(StoredUpload {
                    path,
                    original_name,
                    size,
                });
            }
            Err(e) => {
                discard(&path).await;
                return Err(e);
            }
        }
    }

    stored.ok_or_else(|| Error::Upload("No file uploaded".to_string()))
}
