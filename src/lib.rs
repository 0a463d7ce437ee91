//! Session/identity boundary for apps backed by a hosted identity service.
//!
//! [`SessionManager`] owns the current [`SessionState`], exposes async
//! operations to mutate it (register, sign in, sign out, password reset,
//! federated sign-in), and publishes every change through a watch channel.
//! Credential verification itself is delegated to an [`IdentityProvider`];
//! [`RestIdentityProvider`] talks to an Identity Toolkit-style HTTP service
//! and restores a persisted session at startup.

pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod provider;

pub use error::{AuthError, AuthErrorKind};
pub use identity::{Identity, SessionSnapshot, SessionState};
pub use manager::SessionManager;
pub use provider::rest::RestIdentityProvider;
pub use provider::{AuthUpdate, IdentityProvider};
