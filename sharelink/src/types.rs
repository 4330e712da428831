//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: account identifier, also the namespace of every storage key the account owns
//! - [`FileId`]: file record identifier, assigned by the metadata store at insert time
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`parse_file_id`]: Parse an untrusted public identifier

use uuid::Uuid;

pub type UserId = Uuid;
pub type FileId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Parse a public file identifier taken from a URL.
///
/// Anything that is not a UUID can never name a record, so it maps to `None` rather than an error.
pub fn parse_file_id(raw: &str) -> Option<FileId> {
    Uuid::parse_str(raw.trim()).ok()
}
