//! Credential Guardian
//!
//! Holds the mail provider's access/refresh credential, refreshes it when it
//! expires, falls back to interactive authorization when refreshing fails,
//! and persists every change.

mod credential;
mod guardian;
mod oauth;

pub use credential::{Credential, CredentialStore};
pub use guardian::{Authorizer, CredentialGuardian, TokenRefresher};
pub use oauth::{code_from_redirect, ConsoleAuthorizer, OAuthClient};
