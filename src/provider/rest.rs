//! HTTP identity provider for an Identity Toolkit-style service.
//!
//! Endpoint mapping: account creation -> `accounts:signUp`, credential
//! sign-in -> `accounts:signInWithPassword`, display name ->
//! `accounts:update`, password reset -> `accounts:sendOobCode`, session
//! restoration -> `accounts:lookup` plus the `token` refresh endpoint.
//! Sign-out is local: the service has no server-side session to end.

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{DEFAULT_BASE_URL, RestConfig};
use crate::error::AuthError;
use crate::identity::Identity;
use crate::provider::store::{SessionStore, StoredSession, mask_token, now_ms};
use crate::provider::{AuthUpdate, IdentityProvider, SUBSCRIBER_CAPACITY};

/// Id tokens are treated as expired this long before their real expiry.
const EXPIRY_BUFFER_MS: u64 = 5 * 60 * 1000;

/// Identity service client with on-disk session persistence.
pub struct RestIdentityProvider {
    config: RestConfig,
    http: reqwest::Client,
    store: SessionStore,
    /// Tokens for the active session, if any.
    session: Mutex<Option<StoredSession>>,
    /// Latest verdict, used to seed new subscribers.
    verdict: Mutex<Option<AuthUpdate>>,
    subscribers: Mutex<Vec<mpsc::Sender<AuthUpdate>>>,
}

impl RestIdentityProvider {
    /// Creates the provider and resolves the startup verdict by restoring
    /// the persisted session, refreshing an expired token when needed.
    /// Restoration failure degrades to a signed-out verdict, never an error.
    ///
    /// # Panics
    /// - In test builds (`#[cfg(test)]`), panics if `base_url` is the
    ///   production service.
    /// - At runtime, panics if `AUTHGATE_BLOCK_REAL_API=1` and `base_url` is
    ///   the production service.
    ///
    /// This prevents tests from accidentally making real network requests.
    pub async fn connect(config: RestConfig) -> Self {
        Self::guard_base_url(&config.base_url);

        let provider = Self {
            http: reqwest::Client::new(),
            store: SessionStore::new(config.store_path.clone()),
            config,
            session: Mutex::new(None),
            verdict: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        };

        let verdict = provider.restore().await;
        debug!(
            authenticated = matches!(verdict, AuthUpdate::SignedIn(_)),
            "startup verdict"
        );
        *provider.verdict.lock().unwrap() = Some(verdict);
        provider
    }

    fn guard_base_url(base_url: &str) {
        #[cfg(test)]
        if base_url == DEFAULT_BASE_URL {
            panic!(
                "Tests must not use the production identity service!\n\
                 Set AUTHGATE_BASE_URL to a mock server (e.g., wiremock).\n\
                 Found base_url: {}",
                base_url
            );
        }

        #[cfg(not(test))]
        if std::env::var("AUTHGATE_BLOCK_REAL_API").is_ok_and(|v| v == "1")
            && base_url == DEFAULT_BASE_URL
        {
            panic!(
                "AUTHGATE_BLOCK_REAL_API=1 but trying to use the production identity service!\n\
                 Set AUTHGATE_BASE_URL to a mock server.\n\
                 Found base_url: {}",
                base_url
            );
        }
    }

    /// Attempts to restore the persisted session into a startup verdict.
    async fn restore(&self) -> AuthUpdate {
        let stored = match self.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return AuthUpdate::SignedOut,
            Err(e) => {
                warn!(error = %e, "failed to load persisted session");
                return AuthUpdate::SignedOut;
            }
        };

        let stored = if stored.is_expired() {
            match self.refresh_session(&stored).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(error = %e, "session refresh failed");
                    let _ = self.store.clear();
                    return AuthUpdate::SignedOut;
                }
            }
        } else {
            stored
        };

        match self.lookup(&stored.id_token).await {
            Ok(identity) => {
                debug!(uid = %identity.id, token = %mask_token(&stored.id_token), "session restored");
                *self.session.lock().unwrap() = Some(stored);
                AuthUpdate::SignedIn(identity)
            }
            Err(e) => {
                warn!(error = %e, "persisted session rejected");
                let _ = self.store.clear();
                AuthUpdate::SignedOut
            }
        }
    }

    /// Exchanges the refresh token for a fresh id token and persists it.
    async fn refresh_session(&self, stored: &StoredSession) -> Result<StoredSession, AuthError> {
        let url = format!(
            "{}/v1/token?key={}",
            self.config.base_url, self.config.api_key
        );
        let grant: RefreshGrant = self
            .post_url(
                &url,
                &RefreshRequest {
                    grant_type: "refresh_token",
                    refresh_token: &stored.refresh_token,
                },
            )
            .await?;

        let fresh = StoredSession {
            uid: grant.user_id,
            id_token: grant.id_token,
            refresh_token: grant.refresh_token,
            expires: expiry_ms(&grant.expires_in),
        };
        if let Err(e) = self.store.save(&fresh) {
            warn!(error = %e, "failed to persist refreshed session");
        }
        Ok(fresh)
    }

    /// Fetches the account behind an id token.
    async fn lookup(&self, id_token: &str) -> Result<Identity, AuthError> {
        let response: LookupResponse = self
            .post_identity("lookup", &serde_json::json!({ "idToken": id_token }))
            .await?;
        response
            .users
            .into_iter()
            .next()
            .map(AccountInfo::into_identity)
            .ok_or_else(|| AuthError::provider("lookup returned no account"))
    }

    /// POSTs to an `accounts:` operation with the project key.
    async fn post_identity<T: DeserializeOwned>(
        &self,
        op: &str,
        body: &impl Serialize,
    ) -> Result<T, AuthError> {
        let url = format!(
            "{}/v1/accounts:{}?key={}",
            self.config.base_url, op, self.config.api_key
        );
        self.post_url(&url, body).await
    }

    async fn post_url<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::provider(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::http_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::provider(format!("failed to parse response: {e}")))
    }

    /// Stores the grant's tokens in memory and on disk.
    fn install_session(&self, grant: &TokenGrant) {
        let session = StoredSession {
            uid: grant.local_id.clone(),
            id_token: grant.id_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires: expiry_ms(&grant.expires_in),
        };
        if let Err(e) = self.store.save(&session) {
            warn!(error = %e, "failed to persist session");
        }
        *self.session.lock().unwrap() = Some(session);
    }

    /// Records the verdict and pushes it to every live subscriber.
    fn publish(&self, update: AuthUpdate) {
        *self.verdict.lock().unwrap() = Some(update.clone());
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            // A full subscriber keeps its slot; it only needs the latest
            // verdict and will catch the next one.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl IdentityProvider for RestIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let grant: TokenGrant = self
            .post_identity(
                "signUp",
                &PasswordCredentials {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        let identity = grant.identity();
        self.install_session(&grant);
        self.publish(AuthUpdate::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn update_display_name(
        &self,
        identity: &Identity,
        name: &str,
    ) -> Result<Identity, AuthError> {
        let id_token = self
            .session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.id_token.clone())
            .ok_or_else(|| AuthError::provider("no active session"))?;

        let info: AccountInfo = self
            .post_identity(
                "update",
                &ProfileUpdate {
                    id_token: &id_token,
                    display_name: name,
                    return_secure_token: false,
                },
            )
            .await?;

        let updated = Identity {
            id: info.local_id,
            email: info.email.or_else(|| identity.email.clone()),
            display_name: info.display_name.or_else(|| Some(name.to_string())),
        };
        self.publish(AuthUpdate::SignedIn(updated.clone()));
        Ok(updated)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let grant: TokenGrant = self
            .post_identity(
                "signInWithPassword",
                &PasswordCredentials {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        let identity = grant.identity();
        self.install_session(&grant);
        self.publish(AuthUpdate::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        self.store
            .clear()
            .map_err(|e| AuthError::provider(format!("failed to clear persisted session: {e}")))?;
        *self.session.lock().unwrap() = None;
        self.publish(AuthUpdate::SignedOut);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let _: serde_json::Value = self
            .post_identity(
                "sendOobCode",
                &OobRequest {
                    request_type: "PASSWORD_RESET",
                    email,
                },
            )
            .await?;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<AuthUpdate> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        if let Some(verdict) = self.verdict.lock().unwrap().clone() {
            let _ = tx.try_send(verdict);
        }
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// Expiry timestamp for a grant, applying the refresh buffer.
fn expiry_ms(expires_in: &str) -> u64 {
    let seconds = expires_in.parse::<u64>().unwrap_or(3600);
    now_ms() + (seconds * 1000).saturating_sub(EXPIRY_BUFFER_MS)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OobRequest<'a> {
    request_type: &'a str,
    email: &'a str,
}

/// The token endpoint speaks snake_case, unlike the accounts endpoints.
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

/// Response to signUp / signInWithPassword.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenGrant {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    /// Seconds until the id token expires, as a decimal string.
    expires_in: String,
}

impl TokenGrant {
    fn identity(&self) -> Identity {
        Identity {
            id: self.local_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
}

impl AccountInfo {
    fn into_identity(self) -> Identity {
        Identity {
            id: self.local_id,
            email: self.email,
            display_name: self.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct RefreshGrant {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: grant expiry applies the refresh buffer.
    #[test]
    fn test_expiry_buffer() {
        let before = now_ms();
        let expires = expiry_ms("3600");
        assert!(expires >= before + 3_600_000 - EXPIRY_BUFFER_MS);
        assert!(expires <= now_ms() + 3_600_000 - EXPIRY_BUFFER_MS);
    }

    /// Test: a grant shorter than the buffer is already expired.
    #[test]
    fn test_short_grant_expires_immediately() {
        let expires = expiry_ms("60");
        assert!(expires <= now_ms());
    }

    /// Test: unparseable expiry falls back to an hour.
    #[test]
    fn test_expiry_fallback() {
        let expires = expiry_ms("not-a-number");
        assert!(expires > now_ms());
    }
}
