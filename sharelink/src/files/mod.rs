//! The upload/link lifecycle.
//!
//! - [`uploader`]: turns a selected file into a stored object plus a metadata row
//! - [`progress`]: the simulated upload progress signal
//! - [`registry`]: an owner's records, newest first, kept current by the insert subscription
//! - [`viewer`]: public, unauthenticated resolution of a shared file
//!
//! Everything here works against the backend ports only and spawns no tasks of its own.

pub mod progress;
pub mod registry;
pub mod uploader;
pub mod viewer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    backend::{errors::BackendError, metadata::FileRow},
    format::{format_file_size, format_upload_date},
    types::{FileId, UserId},
};

/// A shared file as the rest of the application sees it. The storage key stays in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: FileId,
    pub owner_id: UserId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub download_count: u64,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            size_bytes: u64::try_from(row.size_bytes).unwrap_or_default(),
            mime_type: row.mime_type,
            public_url: row.public_url,
            created_at: row.created_at,
            download_count: u64::try_from(row.download_count).unwrap_or_default(),
        }
    }
}

impl FileRecord {
    /// Human readable size, e.g. "2.29 MB"
    pub fn size(&self) -> String {
        format_file_size(self.size_bytes)
    }

    /// Human readable upload time
    pub fn uploaded(&self) -> String {
        format_upload_date(&self.created_at)
    }

    pub fn category(&self) -> FileCategory {
        FileCategory::from_mime_type(&self.mime_type)
    }
}

/// Coarse kind of file, used to pick an icon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Pdf,
    Other,
}

impl FileCategory {
    pub fn from_mime_type(mime_type: &str) -> Self {
        let mime_type = mime_type.to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            FileCategory::Image
        } else if mime_type.starts_with("video/") {
            FileCategory::Video
        } else if mime_type == "application/pdf" {
            FileCategory::Pdf
        } else {
            FileCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Pdf => "pdf",
            FileCategory::Other => "other",
        }
    }
}

/// Why an upload did not produce a record.
///
/// The first four are preconditions the caller can check up front with
/// [`uploader::Uploader::check`]; the rest carry the backend failure of the step that broke.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file selected")]
    NothingSelected,

    #[error("Selected file has an empty name")]
    EmptyFileName,

    #[error("Uploading requires a signed-in identity")]
    NotSignedIn,

    #[error("File is {size} bytes, the limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to store object: {0}")]
    Transfer(BackendError),

    #[error("Failed to resolve public URL: {0}")]
    PublicUrl(BackendError),

    #[error("Failed to record file metadata: {0}")]
    Record(BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_record_from_row_hides_storage_key() {
        let owner = Uuid::new_v4();
        let row = FileRow {
            id: Uuid::new_v4(),
            owner_id: owner,
            name: "report.pdf".to_string(),
            size_bytes: 2_400_000,
            mime_type: "application/pdf".to_string(),
            storage_key: format!("{owner}/{}.pdf", Uuid::new_v4()),
            public_url: "http://localhost:3000/objects/x.pdf".to_string(),
            created_at: Utc::now(),
            download_count: 7,
        };

        let record = FileRecord::from(row);
        assert_eq!(record.size_bytes, 2_400_000);
        assert_eq!(record.size(), "2.29 MB");
        assert_eq!(record.download_count, 7);
        assert_eq!(record.category(), FileCategory::Pdf);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("storage_key").is_none());
    }

    #[test]
    fn test_categories() {
        assert_eq!(FileCategory::from_mime_type("image/png"), FileCategory::Image);
        assert_eq!(FileCategory::from_mime_type("VIDEO/mp4"), FileCategory::Video);
        assert_eq!(FileCategory::from_mime_type("application/pdf"), FileCategory::Pdf);
        assert_eq!(FileCategory::from_mime_type("application/zip"), FileCategory::Other);
    }
}
