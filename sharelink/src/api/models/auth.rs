use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::backend::identity::{Identity, SignUpRequest};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignUpBody {
    pub email: String,
    pub password: String,
    /// Defaults to the part of the email before `@`
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<SignUpBody> for SignUpRequest {
    fn from(body: SignUpBody) -> Self {
        Self {
            email: body.email,
            password: body.password,
            display_name: body.display_name,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInBody {
    pub email: String,
    pub password: String,
}

/// Returned on sign-up and sign-in, alongside the session cookie
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub identity: Identity,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignOutResponse {
    pub message: String,
}
