//! Explicitly owned session context.
//!
//! A [`SessionContext`] carries the identity state for one consumer (in the HTTP service, one
//! request). It starts out [`IdentityState::Resolving`], settles once a persisted session token
//! has been restored, and publishes every later change (sign-in, sign-out) through a `watch`
//! channel so the file registry and the auth gate can follow along.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::{
    auth::{
        password::{self, Argon2Params},
        session,
    },
    backend::identity::{Identity, IdentityService, SignUpRequest},
    config::Config,
    errors::{Error, Result},
    types::abbrev_uuid,
};

/// Where identity resolution stands for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// A persisted session may exist but has not been checked yet
    Resolving,
    SignedOut,
    SignedIn(Identity),
}

impl IdentityState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IdentityState::SignedIn(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, IdentityState::Resolving)
    }
}

/// A newly established session: who signed in and the token that persists it.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub identity: Identity,
    pub token: String,
}

pub struct SessionContext {
    identity: Arc<dyn IdentityService>,
    config: Config,
    state: watch::Sender<IdentityState>,
}

impl SessionContext {
    pub fn new(identity: Arc<dyn IdentityService>, config: Config) -> Self {
        let (state, _) = watch::channel(IdentityState::Resolving);
        Self { identity, config, state }
    }

    /// Resolve a persisted session token.
    ///
    /// A missing, invalid or expired token, or one naming an account that no longer exists, settles
    /// the context as signed out. Backend failures are returned and leave it resolving.
    #[instrument(skip_all)]
    pub async fn restore(&self, token: Option<&str>) -> Result<IdentityState> {
        let Some(token) = token else {
            self.state.send_replace(IdentityState::SignedOut);
            return Ok(IdentityState::SignedOut);
        };

        let claimed = match session::verify_session_token(token, &self.config) {
            Ok(identity) => identity,
            Err(Error::Unauthenticated { .. }) => {
                debug!("Discarding invalid session token");
                self.state.send_replace(IdentityState::SignedOut);
                return Ok(IdentityState::SignedOut);
            }
            Err(e) => return Err(e),
        };

        let state = match self.identity.get_identity(claimed.id).await? {
            Some(identity) => IdentityState::SignedIn(identity),
            None => {
                debug!(user_id = %abbrev_uuid(&claimed.id), "Session names an unknown account");
                IdentityState::SignedOut
            }
        };

        self.state.send_replace(state.clone());
        Ok(state)
    }

    #[instrument(skip_all)]
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignedIn> {
        if !self.config.auth.allow_registration {
            return Err(Error::BadRequest {
                message: "User registration is disabled".to_string(),
            });
        }

        password::validate_password(&request.password, &self.config.auth.password)?;

        let identity = self
            .identity
            .sign_up(request, Argon2Params::from(&self.config.auth.password))
            .await?;

        self.establish(identity)
    }

    #[instrument(skip_all)]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn> {
        let identity = self.identity.sign_in(email, password).await?;
        self.establish(identity)
    }

    pub fn sign_out(&self) {
        self.state.send_replace(IdentityState::SignedOut);
    }

    pub fn current(&self) -> IdentityState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every identity change from now on
    pub fn watch(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    /// Wait until the state is no longer [`IdentityState::Resolving`]
    pub async fn resolved(&self) -> IdentityState {
        let mut receiver = self.state.subscribe();
        match receiver.wait_for(IdentityState::is_resolved).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so this only happens if it was torn down mid-wait
            Err(_) => self.current(),
        }
    }

    fn establish(&self, identity: Identity) -> Result<SignedIn> {
        let token = session::create_session_token(&identity, &self.config)?;
        debug!(user_id = %abbrev_uuid(&identity.id), "Session established");
        self.state.send_replace(IdentityState::SignedIn(identity.clone()));
        Ok(SignedIn { identity, token })
    }
}
