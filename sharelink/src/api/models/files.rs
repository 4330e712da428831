use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::Config, files::FileRecord, types::FileId};

/// A shared file. Never includes the storage key.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: FileId,
    pub name: String,
    pub size_bytes: u64,
    /// Human readable size, e.g. "2.29 MB"
    pub size: String,
    pub mime_type: String,
    /// One of image, video, pdf, other
    pub category: String,
    /// Serves the file bytes without authentication
    pub public_url: String,
    /// Page showing the file to anyone holding the link
    pub share_url: String,
    pub created_at: DateTime<Utc>,
    /// Human readable upload time
    pub uploaded: String,
    pub download_count: u64,
}

impl FileResponse {
    pub fn from_record(record: &FileRecord, config: &Config) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            size_bytes: record.size_bytes,
            size: record.size(),
            mime_type: record.mime_type.clone(),
            category: record.category().as_str().to_string(),
            public_url: record.public_url.clone(),
            share_url: config.share_url(&record.id),
            created_at: record.created_at,
            uploaded: record.uploaded(),
            download_count: record.download_count,
        }
    }
}

/// An owner's files, newest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileListResponse {
    pub data: Vec<FileResponse>,
}

impl FileListResponse {
    pub fn from_records(records: &[FileRecord], config: &Config) -> Self {
        Self {
            data: records.iter().map(|record| FileResponse::from_record(record, config)).collect(),
        }
    }
}
