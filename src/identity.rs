//! Identity and session state types.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of an authenticated principal.
///
/// Only an identity provider produces one of these; the session manager
/// stores the latest snapshot it was handed and never edits the fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable, provider-assigned account id.
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Which side of the authentication boundary the process is on.
///
/// Exactly one variant holds at any instant. `Initializing` is entered once
/// at startup and never re-entered after the provider's first verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No verdict from the provider yet.
    Initializing,
    /// No active identity.
    Unauthenticated,
    /// An active identity.
    Authenticated(Identity),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// The active identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

/// One observable unit of session manager state.
///
/// `state` and `busy` always change together under the watch channel's lock,
/// so observers never see a half-applied update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// True while a mutating operation is in flight.
    pub busy: bool,
}

impl SessionSnapshot {
    pub(crate) fn initializing() -> Self {
        Self {
            state: SessionState::Initializing,
            busy: false,
        }
    }
}
