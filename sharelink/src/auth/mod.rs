//! Authentication: accounts sign in with email and password and are remembered by a signed
//! session token.
//!
//! - [`password`]: Argon2 hashing and the password length policy
//! - [`session`]: JWT session tokens and the cookie that persists them across reloads
//! - [`current_user`]: extractors for the request's session and signed-in identity
//! - [`gate`]: the auth gate deciding what protected pages may show
//! - [`middleware`]: per-request session restore and the gate for HTML pages
//!
//! Tokens are accepted from the session cookie or an `Authorization: Bearer` header.

pub mod current_user;
pub mod gate;
pub mod middleware;
pub mod password;
pub mod session;
