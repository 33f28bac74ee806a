//! Lesson PDF uploads.
//!
//! Uploads are validated in memory and written to the configured upload
//! directory under a name derived from the whole lesson id, so distinct
//! lessons never share a file. The stored file is served back under
//! [`UPLOAD_ROUTE`], and that locator is what gets attached to the lesson.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::UploadError;

/// Route prefix under which stored uploads are served.
pub const UPLOAD_ROUTE: &str = "/uploads";

static UNSAFE_ID_CHARS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9-]").ok());

/// A file received from the client.
#[derive(Debug, Clone, Default)]
pub struct PdfUpload {
    /// File name given by the client.
    pub file_name: Option<String>,
    /// Declared content type.
    pub content_type: Option<String>,
    /// File content.
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    /// Checks type, emptiness and size against `limit_mb`.
    pub fn validate(&self, limit_mb: u64) -> Result<(), UploadError> {
        let content_type = self.content_type.as_deref().unwrap_or_default();
        if !content_type.to_ascii_lowercase().contains("pdf") {
            return Err(UploadError::InvalidType {
                content_type: content_type.to_string(),
            });
        }

        let size = self.bytes.len() as u64;
        if size == 0 {
            return Err(UploadError::EmptyFile);
        }
        if size > limit_mb * 1024 * 1024 {
            return Err(UploadError::TooLarge { size, limit_mb });
        }
        Ok(())
    }
}

/// Where an upload ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    /// Lesson the file belongs to.
    pub lesson_id: String,
    /// Path on disk.
    pub path: PathBuf,
    /// Locator to attach to the lesson.
    pub locator: String,
    /// Size in bytes.
    pub size: u64,
}

/// File name used to store a lesson's PDF.
///
/// ASCII letters, digits and `-` are kept as is; every other byte becomes
/// `_` followed by two hex digits. The mapping is injective, so `lesson-12`
/// maps to `lesson-12.pdf` and no two ids share a file.
pub fn lesson_file_name(lesson_id: &str) -> Result<String, UploadError> {
    let invalid = || UploadError::InvalidLessonId {
        id: lesson_id.to_string(),
    };
    if lesson_id.is_empty() {
        return Err(invalid());
    }

    let re = UNSAFE_ID_CHARS.as_ref().ok_or_else(invalid)?;
    let encoded = re.replace_all(lesson_id, |caps: &regex::Captures<'_>| {
        caps[0].bytes().map(|b| format!("_{b:02x}")).collect::<String>()
    });
    Ok(format!("{encoded}.pdf"))
}

/// Writes validated uploads to disk.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    limit_mb: u64,
}

impl UploadStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, limit_mb: u64) -> Self {
        Self {
            dir: dir.into(),
            limit_mb,
        }
    }

    /// Directory files are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Size limit in megabytes.
    #[must_use]
    pub const fn limit_mb(&self) -> u64 {
        self.limit_mb
    }

    /// Validates and stores `upload` for `lesson_id`.
    ///
    /// Nothing is written when validation fails.
    pub async fn save(
        &self,
        lesson_id: &str,
        upload: &PdfUpload,
    ) -> Result<StoredUpload, UploadError> {
        upload.validate(self.limit_mb)?;
        let file_name = lesson_file_name(lesson_id)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, &e))?;

        let path = self.dir.join(&file_name);
        debug!(path = %path.display(), size = upload.bytes.len(), "Writing upload");
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| storage_error(&path, &e))?;

        info!(lesson = %lesson_id, file = %file_name, "Lesson document stored");
        Ok(StoredUpload {
            lesson_id: lesson_id.to_string(),
            path,
            locator: format!("{UPLOAD_ROUTE}/{file_name}"),
            size: upload.bytes.len() as u64,
        })
    }
}

fn storage_error(path: &Path, err: &std::io::Error) -> UploadError {
    UploadError::Storage {
        message: format!("{}: {err}", path.display()),
    }
}
