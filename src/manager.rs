//! Session manager: process-lifetime holder of the current identity state.
//!
//! One [`SessionManager`] is constructed per process and passed by reference
//! to consumers; there is no ambient singleton. Construction subscribes to
//! the provider's notification channel exactly once and spawns a forwarder
//! task that applies provider verdicts to the shared snapshot. Dropping the
//! manager aborts the task, which drops the subscription.
//!
//! State machine: `Initializing -> {Authenticated, Unauthenticated}` on the
//! first verdict, thereafter `Authenticated <-> Unauthenticated`. Explicit
//! operation successes and provider notifications both write through the
//! same compare-and-publish path, so the redundant confirmation the provider
//! sends after an explicit operation is a no-op for observers.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::identity::{Identity, SessionSnapshot, SessionState};
use crate::provider::{AuthUpdate, IdentityProvider};

pub struct SessionManager<P> {
    provider: Arc<P>,
    snapshot: watch::Sender<SessionSnapshot>,
    forwarder: JoinHandle<()>,
}

impl<P: IdentityProvider> SessionManager<P> {
    /// Creates the manager and subscribes to the provider. State starts at
    /// `Initializing` and stays there until the provider's first verdict.
    pub fn new(provider: Arc<P>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::initializing());
        let updates = provider.subscribe();
        let forwarder = tokio::spawn(forward_updates(updates, snapshot.clone()));
        Self {
            provider,
            snapshot,
            forwarder,
        }
    }

    /// Current state and busy flag as one consistent value.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.snapshot.borrow().busy
    }

    /// Subscribes to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Creates an account, optionally applies a display name to it, and
    /// signs the new identity in.
    ///
    /// Email format is a UI concern; only emptiness is checked here. When the
    /// display-name step fails the operation reports that failure even though
    /// the account exists; the provider's own notification may still sign the
    /// bare identity in.
    pub async fn register_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Identity, AuthError> {
        validate_credentials(email, password)?;
        self.set_busy(true);
        let result = match self.provider.create_account(email, password).await {
            Ok(identity) => match display_name {
                Some(name) => self.provider.update_display_name(&identity, name).await,
                None => Ok(identity),
            },
            Err(e) => Err(e),
        };
        self.finish("register_account", result)
    }

    /// Verifies credentials with the provider. Failure leaves the session
    /// state exactly as it was.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        validate_credentials(email, password)?;
        self.set_busy(true);
        let result = self.provider.authenticate(email, password).await;
        self.finish("authenticate", result)
    }

    /// Signs in through the provider's federated flow. Fails with a
    /// not-implemented error when the provider leaves the flow unwired.
    pub async fn authenticate_federated(&self) -> Result<Identity, AuthError> {
        self.set_busy(true);
        let result = self.provider.authenticate_federated().await;
        self.finish("authenticate_federated", result)
    }

    /// Ends the current session. On success the state is `Unauthenticated`
    /// even if it already was; on failure it is left unchanged.
    pub async fn end_session(&self) -> Result<(), AuthError> {
        self.set_busy(true);
        match self.provider.end_session().await {
            Ok(()) => {
                self.apply(SessionState::Unauthenticated);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "end_session failed");
                self.set_busy(false);
                Err(e)
            }
        }
    }

    /// Asks the provider to send a password-reset message. Session state is
    /// untouched regardless of outcome.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::invalid_input("email must not be empty"));
        }
        self.set_busy(true);
        let result = self.provider.send_password_reset(email).await;
        if let Err(e) = &result {
            warn!(error = %e, "request_password_reset failed");
        }
        self.set_busy(false);
        result
    }

    /// Applies an operation outcome: success stores the identity and
    /// transitions to `Authenticated` before the call resolves, failure
    /// leaves state as it was. Busy clears either way.
    fn finish(&self, op: &str, result: Result<Identity, AuthError>) -> Result<Identity, AuthError> {
        match result {
            Ok(identity) => {
                debug!(op, id = %identity.id, "signed in");
                self.apply(SessionState::Authenticated(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                warn!(op, error = %e, "operation failed");
                self.set_busy(false);
                Err(e)
            }
        }
    }

    fn apply(&self, next: SessionState) {
        self.snapshot.send_modify(|snap| {
            snap.state = next;
            snap.busy = false;
        });
    }

    fn set_busy(&self, busy: bool) {
        self.snapshot.send_if_modified(|snap| {
            if snap.busy == busy {
                return false;
            }
            snap.busy = busy;
            true
        });
    }
}

impl<P> Drop for SessionManager<P> {
    // Aborting the forwarder drops its receiver, which unsubscribes from the
    // provider.
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() {
        return Err(AuthError::invalid_input("email must not be empty"));
    }
    if password.is_empty() {
        return Err(AuthError::invalid_input("password must not be empty"));
    }
    Ok(())
}

/// Applies provider verdicts to the shared snapshot. Re-applying the state
/// already held publishes nothing, so a notification that merely confirms an
/// in-flight operation's result is invisible to observers.
async fn forward_updates(
    mut updates: mpsc::Receiver<AuthUpdate>,
    snapshot: watch::Sender<SessionSnapshot>,
) {
    while let Some(update) = updates.recv().await {
        let next = match update {
            AuthUpdate::SignedIn(identity) => SessionState::Authenticated(identity),
            AuthUpdate::SignedOut => SessionState::Unauthenticated,
        };
        snapshot.send_if_modified(|snap| {
            if snap.state == next {
                return false;
            }
            debug!(authenticated = next.is_authenticated(), "provider verdict");
            snap.state = next.clone();
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::AuthErrorKind;

    /// Provider stub that replays scripted outcomes.
    #[derive(Default)]
    struct ScriptedProvider {
        sign_ins: Mutex<VecDeque<Result<Identity, AuthError>>>,
        sign_outs: Mutex<VecDeque<Result<(), AuthError>>>,
        resets: Mutex<VecDeque<Result<(), AuthError>>>,
        display_name_error: Mutex<Option<AuthError>>,
        subscribers: Mutex<Vec<mpsc::Sender<AuthUpdate>>>,
    }

    impl ScriptedProvider {
        fn arc() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn push_sign_in(&self, outcome: Result<Identity, AuthError>) {
            self.sign_ins.lock().unwrap().push_back(outcome);
        }

        fn push_sign_out(&self, outcome: Result<(), AuthError>) {
            self.sign_outs.lock().unwrap().push_back(outcome);
        }

        fn push_reset(&self, outcome: Result<(), AuthError>) {
            self.resets.lock().unwrap().push_back(outcome);
        }

        fn pending_sign_ins(&self) -> usize {
            self.sign_ins.lock().unwrap().len()
        }

        /// Pushes a verdict to every live subscriber.
        fn notify(&self, update: &AuthUpdate) {
            let subs = self.subscribers.lock().unwrap();
            for tx in subs.iter() {
                let _ = tx.try_send(update.clone());
            }
        }

        fn subscribers_closed(&self) -> bool {
            self.subscribers.lock().unwrap().iter().all(|tx| tx.is_closed())
        }
    }

    impl IdentityProvider for ScriptedProvider {
        async fn create_account(&self, _email: &str, _pw: &str) -> Result<Identity, AuthError> {
            self.sign_ins.lock().unwrap().pop_front().unwrap()
        }

        async fn update_display_name(
            &self,
            identity: &Identity,
            name: &str,
        ) -> Result<Identity, AuthError> {
            if let Some(error) = self.display_name_error.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(Identity {
                display_name: Some(name.to_string()),
                ..identity.clone()
            })
        }

        async fn authenticate(&self, _email: &str, _pw: &str) -> Result<Identity, AuthError> {
            self.sign_ins.lock().unwrap().pop_front().unwrap()
        }

        async fn end_session(&self) -> Result<(), AuthError> {
            self.sign_outs.lock().unwrap().pop_front().unwrap()
        }

        async fn send_password_reset(&self, _email: &str) -> Result<(), AuthError> {
            self.resets.lock().unwrap().pop_front().unwrap()
        }

        fn subscribe(&self) -> mpsc::Receiver<AuthUpdate> {
            let (tx, rx) = mpsc::channel(crate::provider::SUBSCRIBER_CAPACITY);
            self.subscribers.lock().unwrap().push(tx);
            rx
        }
    }

    fn ann() -> Identity {
        Identity {
            id: "uid-ann".to_string(),
            email: Some("a@x.com".to_string()),
            display_name: None,
        }
    }

    async fn wait_for_state(manager: &SessionManager<ScriptedProvider>, state: &SessionState) {
        let mut rx = manager.watch();
        rx.wait_for(|snap| snap.state == *state).await.unwrap();
    }

    #[tokio::test]
    async fn test_starts_initializing() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));
        let snap = manager.snapshot();
        assert_eq!(snap.state, SessionState::Initializing);
        assert!(!snap.busy);
    }

    #[tokio::test]
    async fn test_register_applies_display_name() {
        let provider = ScriptedProvider::arc();
        provider.push_sign_in(Ok(ann()));
        let manager = SessionManager::new(Arc::clone(&provider));

        let identity = manager
            .register_account("a@x.com", "secret1", Some("Ann"))
            .await
            .unwrap();

        assert_eq!(identity.display_name.as_deref(), Some("Ann"));
        assert_eq!(identity.email.as_deref(), Some("a@x.com"));
        assert!(!identity.id.is_empty());

        let snap = manager.snapshot();
        assert_eq!(snap.state.identity(), Some(&identity));
        assert!(!snap.busy);
    }

    #[tokio::test]
    async fn test_register_surfaces_display_name_failure() {
        let provider = ScriptedProvider::arc();
        provider.push_sign_in(Ok(ann()));
        *provider.display_name_error.lock().unwrap() =
            Some(AuthError::provider("PROFILE_UPDATE_FAILED"));
        let manager = SessionManager::new(Arc::clone(&provider));

        let err = manager
            .register_account("a@x.com", "secret1", Some("Ann"))
            .await
            .unwrap_err();
        assert_eq!(err.message, "PROFILE_UPDATE_FAILED");
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_failed_authenticate_leaves_state() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));

        provider.notify(&AuthUpdate::SignedOut);
        wait_for_state(&manager, &SessionState::Unauthenticated).await;

        provider.push_sign_in(Err(AuthError::provider("INVALID_PASSWORD")));
        let err = manager.authenticate("a@x.com", "wrong").await.unwrap_err();
        assert!(!err.message.is_empty());

        let snap = manager.snapshot();
        assert_eq!(snap.state, SessionState::Unauthenticated);
        assert!(!snap.busy);
    }

    #[tokio::test]
    async fn test_end_session_while_signed_out() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));

        provider.notify(&AuthUpdate::SignedOut);
        wait_for_state(&manager, &SessionState::Unauthenticated).await;

        provider.push_sign_out(Ok(()));
        manager.end_session().await.unwrap();
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_end_session_failure_keeps_identity() {
        let provider = ScriptedProvider::arc();
        provider.push_sign_in(Ok(ann()));
        let manager = SessionManager::new(Arc::clone(&provider));
        manager.authenticate("a@x.com", "secret1").await.unwrap();

        provider.push_sign_out(Err(AuthError::provider("NETWORK_ERROR")));
        let err = manager.end_session().await.unwrap_err();
        assert_eq!(err.message, "NETWORK_ERROR");
        assert!(manager.state().is_authenticated());
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_password_reset_preserves_state() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));

        provider.notify(&AuthUpdate::SignedIn(ann()));
        wait_for_state(&manager, &SessionState::Authenticated(ann())).await;

        provider.push_reset(Ok(()));
        manager.request_password_reset("a@x.com").await.unwrap();
        assert_eq!(manager.state(), SessionState::Authenticated(ann()));

        provider.push_reset(Err(AuthError::provider("EMAIL_NOT_FOUND")));
        let err = manager.request_password_reset("b@x.com").await.unwrap_err();
        assert_eq!(err.message, "EMAIL_NOT_FOUND");
        assert_eq!(manager.state(), SessionState::Authenticated(ann()));
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_duplicate_verdicts_publish_once() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));

        provider.notify(&AuthUpdate::SignedIn(ann()));
        let mut rx = manager.watch();
        rx.wait_for(|snap| snap.state.is_authenticated())
            .await
            .unwrap();
        rx.mark_unchanged();

        provider.notify(&AuthUpdate::SignedIn(ann()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(manager.state(), SessionState::Authenticated(ann()));
    }

    #[tokio::test]
    async fn test_federated_sign_in_unwired() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));

        let err = manager.authenticate_federated().await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::NotImplemented);
        assert_eq!(manager.state(), SessionState::Initializing);
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_empty_input_never_reaches_provider() {
        let provider = ScriptedProvider::arc();
        provider.push_sign_in(Ok(ann()));
        let manager = SessionManager::new(Arc::clone(&provider));

        let err = manager.authenticate("", "secret1").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
        let err = manager.authenticate("a@x.com", "").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
        let err = manager
            .register_account("  ", "secret1", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);
        let err = manager.request_password_reset("").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::InvalidInput);

        // The scripted outcome is still queued: no provider call happened.
        assert_eq!(provider.pending_sign_ins(), 1);
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let provider = ScriptedProvider::arc();
        let manager = SessionManager::new(Arc::clone(&provider));
        drop(manager);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(provider.subscribers_closed());
    }
}
