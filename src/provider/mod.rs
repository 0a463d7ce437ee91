//! Identity provider implementations.

pub mod rest;
pub mod store;

use tokio::sync::mpsc;

use crate::error::AuthError;
use crate::identity::Identity;

/// Subscriber channel capacity. Verdicts are rare and a lagging subscriber
/// only ever needs the latest one.
pub(crate) const SUBSCRIBER_CAPACITY: usize = 16;

/// A change pushed on the provider's notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUpdate {
    SignedIn(Identity),
    SignedOut,
}

/// Service of record for credential verification and account lifecycle.
///
/// All operations are async and fallible; failures carry the provider's own
/// wording so callers can render it inline. `subscribe` returns a channel of
/// [`AuthUpdate`]s; dropping the receiver is the unsubscribe.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider: Send + Sync {
    /// Creates an account and signs it in.
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Applies a display name to an identity, returning the updated snapshot.
    async fn update_display_name(
        &self,
        identity: &Identity,
        name: &str,
    ) -> Result<Identity, AuthError>;

    /// Verifies credentials and signs the matching identity in.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Federated (OAuth-style) sign-in. Providers without a wired federated
    /// flow inherit this default, which reports the gap as an error value.
    async fn authenticate_federated(&self) -> Result<Identity, AuthError> {
        Err(AuthError::not_implemented(
            "federated sign-in is not configured for this provider",
        ))
    }

    /// Ends the active session.
    async fn end_session(&self) -> Result<(), AuthError>;

    /// Sends a password-reset message for the account.
    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Subscribes to auth state changes. The receiver is seeded with the
    /// current verdict when the provider already has one.
    fn subscribe(&self) -> mpsc::Receiver<AuthUpdate>;
}
