//! Request and response bodies of the JSON API.

pub mod auth;
pub mod files;
