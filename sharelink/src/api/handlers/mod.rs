//! HTTP request handlers.
//!
//! - [`auth`]: sign-up, sign-in, sign-out and the current session
//! - [`files`]: uploads and the owner's file list, including the live insert feed
//! - [`public`]: shared file metadata and object bytes, without authentication
//! - [`pages`]: server-rendered HTML pages
//!
//! Handlers return [`crate::errors::Error`] on failure, which renders as a JSON body with a
//! user-safe `message` and the matching status code.

pub mod auth;
pub mod files;
pub mod pages;
pub mod public;
