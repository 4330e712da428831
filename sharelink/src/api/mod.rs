//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers, JSON API and HTML pages
//! - **[`models`]**: Request/response bodies of the JSON API
//!
//! # API Structure
//!
//! - **Authentication** (`/api/v1/auth/*`): sign-up, sign-in, sign-out, current session
//! - **Files** (`/api/v1/files*`): upload, list and live insert feed for the signed-in owner
//! - **Public** (`/api/v1/public/files/{id}`, `/objects/{key}`): shared files, no authentication
//!
//! All JSON endpoints are documented with `utoipa`; the rendered reference lives at `/api/docs`.

pub mod handlers;
pub mod models;
