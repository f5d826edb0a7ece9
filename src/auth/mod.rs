//! Session credential lifecycle.
//!
//! - [`CredentialStore`] holds one [`CredentialRecord`] per session
//! - [`Orchestrator`] attaches, refreshes and retries bearer tokens around
//!   each outbound call

mod credentials;
mod orchestrator;
mod store;
mod tokens;

pub use credentials::Credentials;
pub use orchestrator::{LoginSummary, Orchestrator, DEFAULT_REFRESH_SKEW_SECS, MAX_REFRESH_SKEW_SECS};
pub use store::{CredentialRecord, CredentialStore, InMemoryCredentialStore, SessionId};
pub use tokens::{AccessToken, RefreshToken};
