//! OpenAPI documentation for the JSON API at `/api/v1/*`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    api::{
        self,
        models::{
            auth::{AuthResponse, SignInBody, SignOutResponse, SignUpBody},
            files::{FileListResponse, FileResponse},
        },
    },
    backend::identity::Identity,
};

/// Session cookie set by sign-up and sign-in, or the same token as a bearer header.
struct SessionSecurityAddon;

impl Modify for SessionSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "sharelink_session",
                    "Session token set by sign-up and sign-in",
                ))),
            );
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("The session token, sent as `Authorization: Bearer <token>`"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Sharelink API")
    ),
    modifiers(&SessionSecurityAddon),
    paths(
        api::handlers::auth::sign_up,
        api::handlers::auth::sign_in,
        api::handlers::auth::sign_out,
        api::handlers::auth::get_session,
        api::handlers::files::upload_file,
        api::handlers::files::list_files,
        api::handlers::files::file_events,
        api::handlers::public::get_public_file,
    ),
    components(
        schemas(
            Identity,
            SignUpBody,
            SignInBody,
            AuthResponse,
            SignOutResponse,
            FileResponse,
            FileListResponse,
        )
    ),
    tags(
        (name = "authentication", description = "Accounts and sessions"),
        (name = "files", description = "Uploads and the signed-in owner's files"),
        (name = "public", description = "Shared files, no authentication"),
    ),
    info(
        title = "Sharelink API",
        description = "Upload files and share them with a public link",
    )
)]
pub struct ApiDoc;
