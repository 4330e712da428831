use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use std::sync::Arc;
use tracing::{instrument, trace};

use crate::{
    AppState,
    backend::identity::Identity,
    config::Config,
    errors::{Error, Result},
    session::{IdentityState, SessionContext},
};

/// Session token carried by the request: the session cookie first, then an
/// `Authorization: Bearer` header.
pub fn session_token(headers: &HeaderMap, config: &Config) -> Option<String> {
    let cookie_name = &config.auth.session.cookie_name;

    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name.as_str() && !value.is_empty())
        .map(|(_, value)| value.to_string());

    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The request's session context, created and restored on first use when the session
/// middleware has not already done so.
async fn session_context(parts: &mut Parts, state: &AppState) -> Result<Arc<SessionContext>> {
    if let Some(ctx) = parts.extensions.get::<Arc<SessionContext>>() {
        return Ok(ctx.clone());
    }

    trace!("No session context on request, restoring one");
    let ctx = Arc::new(SessionContext::new(state.backend.identity.clone(), state.config.clone()));
    ctx.restore(session_token(&parts.headers, &state.config).as_deref()).await?;
    parts.extensions.insert(ctx.clone());
    Ok(ctx)
}

/// Session context of the current request, signed in or not.
pub struct Session(pub Arc<SessionContext>);

impl FromRequestParts<AppState> for Session {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        Ok(Self(session_context(parts, state).await?))
    }
}

/// The signed-in identity. Rejects with 401 when the request carries no valid session.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let ctx = session_context(parts, state).await?;

        match ctx.current() {
            IdentityState::SignedIn(identity) => Ok(Self(identity)),
            IdentityState::SignedOut => Err(Error::Unauthenticated { message: None }),
            IdentityState::Resolving => Err(Error::Internal {
                operation: "resolve session".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_token_from_cookie() {
        let config = Config::default();
        let map = headers(&[(header::COOKIE, "theme=dark; sharelink_session=abc.def.ghi; other=1")]);
        assert_eq!(session_token(&map, &config), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let config = Config::default();
        let map = headers(&[
            (header::COOKIE, "sharelink_session=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        assert_eq!(session_token(&map, &config), Some("from-cookie".to_string()));
    }

    #[test]
    fn test_token_from_bearer() {
        let config = Config::default();
        let map = headers(&[(header::AUTHORIZATION, "Bearer from-header")]);
        assert_eq!(session_token(&map, &config), Some("from-header".to_string()));
    }

    #[test]
    fn test_cleared_cookie_is_no_token() {
        let config = Config::default();
        let map = headers(&[(header::COOKIE, "sharelink_session=")]);
        assert_eq!(session_token(&map, &config), None);

        let map = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert_eq!(session_token(&map, &config), None);
    }
}
