use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::{
    AppState,
    api::models::auth::{AuthResponse, SignInBody, SignOutResponse, SignUpBody},
    auth::{
        current_user::{CurrentIdentity, Session},
        session,
    },
    backend::identity::Identity,
    errors::Error,
};

/// Create an account and sign in
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpBody,
    tag = "authentication",
    responses(
        (status = 201, description = "Account created, session cookie set", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "An account with this email already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_up(
    State(state): State<AppState>,
    Session(ctx): Session,
    Json(body): Json<SignUpBody>,
) -> Result<impl IntoResponse, Error> {
    let signed_in = ctx.sign_up(body.into()).await?;
    let cookie = session::create_session_cookie(&signed_in.token, &state.config);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            identity: signed_in.identity,
            message: "Account created".to_string(),
        }),
    ))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInBody,
    tag = "authentication",
    responses(
        (status = 200, description = "Signed in, session cookie set", body = AuthResponse),
        (status = 401, description = "Invalid email or password"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_in(
    State(state): State<AppState>,
    Session(ctx): Session,
    Json(body): Json<SignInBody>,
) -> Result<impl IntoResponse, Error> {
    let signed_in = ctx.sign_in(&body.email, &body.password).await?;
    let cookie = session::create_session_cookie(&signed_in.token, &state.config);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            identity: signed_in.identity,
            message: "Signed in".to_string(),
        }),
    ))
}

/// Sign out and clear the session cookie
#[utoipa::path(
    post,
    path = "/auth/sign-out",
    tag = "authentication",
    responses(
        (status = 200, description = "Signed out", body = SignOutResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_out(State(state): State<AppState>, Session(ctx): Session) -> impl IntoResponse {
    ctx.sign_out();

    (
        [(header::SET_COOKIE, session::clear_session_cookie(&state.config))],
        Json(SignOutResponse {
            message: "Signed out".to_string(),
        }),
    )
}

/// The signed-in identity
#[utoipa::path(
    get,
    path = "/auth/session",
    tag = "authentication",
    responses(
        (status = 200, description = "Current identity", body = Identity),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_session(CurrentIdentity(identity): CurrentIdentity) -> Json<Identity> {
    Json(identity)
}
