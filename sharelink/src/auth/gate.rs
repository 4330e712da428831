//! Auth gate: what a protected page may show for a given identity state.
//!
//! Protected content is only ever produced from [`GateDecision::Render`], which carries the
//! identity it was resolved for. While identity is still resolving the gate answers
//! [`GateDecision::Loading`], never a redirect and never the page itself.

use crate::{backend::identity::Identity, session::IdentityState};

/// Where signed-out visitors are sent
pub const LANDING_PATH: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Loading,
    Redirect(String),
    Render(Identity),
}

#[derive(Debug, Clone)]
pub struct AuthGate {
    redirect_to: String,
}

impl AuthGate {
    pub fn new(redirect_to: impl Into<String>) -> Self {
        Self {
            redirect_to: redirect_to.into(),
        }
    }

    pub fn decide(&self, state: &IdentityState) -> GateDecision {
        match state {
            IdentityState::Resolving => GateDecision::Loading,
            IdentityState::SignedOut => GateDecision::Redirect(self.redirect_to.clone()),
            IdentityState::SignedIn(identity) => GateDecision::Render(identity.clone()),
        }
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new(LANDING_PATH)
    }
}
