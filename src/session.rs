//! Per-browser sign-in state.
//!
//! The session cookie carries an [`AuthPhase`] driven by a small state
//! machine, plus the [`Identity`] once the backend has vouched for it.
//!
//! ```text
//! Anonymous ──Submit──► Authenticating ──Confirmed──► Authenticated
//!     ▲  │                  │  │                         │  ▲
//!     │  │     Rejected /   │  │ TokenRedeemed           │  │ TokenRedeemed
//!     │  │     LinkSent ◄───┘  └────────────────────────►│──┘
//!     │  └──────────────TokenRedeemed─────────────────►  │
//!     │                                                  │ SignOut
//!     └──────────Reset────────── SignedOut ◄─────────────┘
//! ```

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::warn;

use crate::{backend::Identity, AppError, AppResult};

pub const IDENTITY: &str = "identity";
pub const AUTH_PHASE: &str = "auth_phase";

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Anonymous)

    Anonymous => {
        Submit => Authenticating,
        TokenRedeemed => Authenticated
    },
    Authenticating => {
        Confirmed => Authenticated,
        Rejected => Anonymous,
        LinkSent => Anonymous,
        TokenRedeemed => Authenticated
    },
    Authenticated => {
        SignOut => SignedOut,
        TokenRedeemed => Authenticated
    },
    SignedOut => {
        Reset => Anonymous,
        Submit => Authenticating,
        TokenRedeemed => Authenticated
    }
}

pub use session_machine::Input as PhaseInput;
pub use session_machine::State as PhaseState;
pub use session_machine::StateMachine as PhaseMachine;

/// What the session cookie records about sign-in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    SignedOut,
}

impl From<&PhaseState> for AuthPhase {
    fn from(state: &PhaseState) -> Self {
        match state {
            PhaseState::Anonymous => AuthPhase::Anonymous,
            PhaseState::Authenticating => AuthPhase::Authenticating,
            PhaseState::Authenticated => AuthPhase::Authenticated,
            PhaseState::SignedOut => AuthPhase::SignedOut,
        }
    }
}

impl From<AuthPhase> for PhaseState {
    fn from(phase: AuthPhase) -> Self {
        match phase {
            AuthPhase::Anonymous => PhaseState::Anonymous,
            AuthPhase::Authenticating => PhaseState::Authenticating,
            AuthPhase::Authenticated => PhaseState::Authenticated,
            AuthPhase::SignedOut => PhaseState::SignedOut,
        }
    }
}

/// Drives the phase machine for one request and writes the result back.
pub struct Lifecycle {
    session: Session,
    machine: PhaseMachine,
}

impl Lifecycle {
    pub async fn load(session: Session) -> AppResult<Self> {
        let phase = session.get::<AuthPhase>(AUTH_PHASE).await?.unwrap_or_default();
        Ok(Self {
            session,
            machine: PhaseMachine::from_state(phase.into()),
        })
    }

    pub fn phase(&self) -> AuthPhase {
        self.machine.state().into()
    }

    fn step(&mut self, input: PhaseInput, name: &'static str) -> bool {
        let from = self.phase();
        let moved = self.machine.consume(&input).is_ok();
        if !moved {
            warn!(?from, input = name, "ignored impossible sign-in transition");
        }
        moved
    }

    async fn persist(&self) -> AppResult<()> {
        self.session.insert(AUTH_PHASE, self.phase()).await?;
        Ok(())
    }

    /// Starts a credential or magic-link attempt. `false` means the session
    /// is already signed in.
    pub fn begin(&mut self) -> bool {
        self.step(PhaseInput::Submit, "submit")
    }

    pub async fn confirmed(&mut self, identity: &Identity) -> AppResult<()> {
        self.step(PhaseInput::Confirmed, "confirmed");
        self.sign_in(identity).await
    }

    /// A confirmation or magic link was redeemed.
    pub async fn redeemed(&mut self, identity: &Identity) -> AppResult<()> {
        self.step(PhaseInput::TokenRedeemed, "token_redeemed");
        self.sign_in(identity).await
    }

    async fn sign_in(&mut self, identity: &Identity) -> AppResult<()> {
        // new id on privilege change
        self.session.cycle_id().await?;
        self.session.insert(IDENTITY, identity).await?;
        self.persist().await
    }

    pub async fn rejected(&mut self) -> AppResult<()> {
        self.step(PhaseInput::Rejected, "rejected");
        self.persist().await
    }

    pub async fn link_sent(&mut self) -> AppResult<()> {
        self.step(PhaseInput::LinkSent, "link_sent");
        self.persist().await
    }

    /// Ends the session. The cookie's record is deleted outright.
    pub async fn sign_out(mut self) -> AppResult<()> {
        if self.step(PhaseInput::SignOut, "sign_out") {
            self.step(PhaseInput::Reset, "reset");
        }
        self.session.flush().await?;
        Ok(())
    }
}

/// The signed-in caller. Anonymous requests are sent to `/login`.
pub struct CurrentUser(pub Identity);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        match session.get::<Identity>(IDENTITY).await {
            Ok(Some(identity)) => Ok(CurrentUser(identity)),
            Ok(None) => Err(Redirect::to("/login").into_response()),
            Err(err) => Err(AppError::from(err).into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_anonymous() {
        let machine = PhaseMachine::new();
        assert_eq!(*machine.state(), PhaseState::Anonymous);
        assert_eq!(AuthPhase::from(machine.state()), AuthPhase::Anonymous);
    }

    #[test]
    fn password_sign_in_then_out() {
        let mut machine = PhaseMachine::new();

        machine.consume(&PhaseInput::Submit).unwrap();
        assert_eq!(*machine.state(), PhaseState::Authenticating);

        machine.consume(&PhaseInput::Confirmed).unwrap();
        assert_eq!(*machine.state(), PhaseState::Authenticated);

        machine.consume(&PhaseInput::SignOut).unwrap();
        assert_eq!(*machine.state(), PhaseState::SignedOut);

        machine.consume(&PhaseInput::Reset).unwrap();
        assert_eq!(*machine.state(), PhaseState::Anonymous);
    }

    #[test]
    fn rejection_and_link_return_to_anonymous() {
        let mut machine = PhaseMachine::new();
        machine.consume(&PhaseInput::Submit).unwrap();
        machine.consume(&PhaseInput::Rejected).unwrap();
        assert_eq!(*machine.state(), PhaseState::Anonymous);

        machine.consume(&PhaseInput::Submit).unwrap();
        machine.consume(&PhaseInput::LinkSent).unwrap();
        assert_eq!(*machine.state(), PhaseState::Anonymous);
    }

    #[test]
    fn link_redeems_from_any_phase() {
        for phase in [AuthPhase::Anonymous, AuthPhase::Authenticating, AuthPhase::Authenticated, AuthPhase::SignedOut] {
            let mut machine = PhaseMachine::from_state(phase.into());
            assert!(machine.consume(&PhaseInput::TokenRedeemed).is_ok());
            assert_eq!(*machine.state(), PhaseState::Authenticated);
        }
    }

    #[test]
    fn signed_in_session_cannot_resubmit() {
        let mut machine = PhaseMachine::from_state(PhaseState::Authenticated);
        assert!(machine.consume(&PhaseInput::Submit).is_err());
        assert_eq!(*machine.state(), PhaseState::Authenticated);
    }

    #[test]
    fn anonymous_cannot_sign_out() {
        let mut machine = PhaseMachine::new();
        assert!(machine.consume(&PhaseInput::SignOut).is_err());
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AuthPhase::SignedOut).unwrap(), "\"signed_out\"");
    }
}
