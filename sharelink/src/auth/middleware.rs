use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::{
    AppState,
    auth::{
        current_user::session_token,
        gate::{AuthGate, GateDecision},
    },
    errors::Error,
    session::SessionContext,
};

/// Give every request its own [`SessionContext`], restored from the request's session token.
///
/// A backend failure during restore is logged and leaves the context resolving; gated pages then
/// show the loading page and API extractors answer 500.
pub async fn session_layer(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let ctx = Arc::new(SessionContext::new(state.backend.identity.clone(), state.config.clone()));
    let token = session_token(request.headers(), &state.config);

    if let Err(e) = ctx.restore(token.as_deref()).await {
        error!("Failed to restore session: {:#}", e);
    }

    request.extensions_mut().insert(ctx);
    next.run(request).await
}

/// Gate for protected HTML pages: loading page, redirect to the landing page, or the page itself.
pub async fn require_identity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(ctx) = request.extensions().get::<Arc<SessionContext>>().cloned() else {
        return Error::Internal {
            operation: "gate request without a session context".to_string(),
        }
        .into_response();
    };

    match AuthGate::default().decide(&ctx.current()) {
        GateDecision::Render(_) => next.run(request).await,
        GateDecision::Redirect(to) => {
            debug!(path = %request.uri().path(), "Signed out, redirecting to {}", to);
            Redirect::to(&to).into_response()
        }
        GateDecision::Loading => match state.pages.loading() {
            Ok(page) => {
                let mut response = (StatusCode::SERVICE_UNAVAILABLE, page).into_response();
                response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                response
            }
            Err(e) => e.into_response(),
        },
    }
}
