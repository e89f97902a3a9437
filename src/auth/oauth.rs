//! OAuth2 token endpoint client and console authorization flow

use super::credential::Credential;
use super::guardian::{Authorizer, TokenRefresher};
use crate::config::MailConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into a credential, keeping `previous_refresh` when the
    /// endpoint does not rotate the refresh token.
    fn into_credential(self, previous_refresh: &str) -> Credential {
        let mut credential = Credential::new(
            self.access_token,
            self.refresh_token
                .unwrap_or_else(|| previous_refresh.to_string()),
            Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)),
        );
        if let Some(token_type) = self.token_type {
            credential.token_type = token_type;
        }
        credential
    }
}

/// OAuth2 client for the mail provider's token endpoint
pub struct OAuthClient {
    config: MailConfig,
    client_secret: String,
    client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: MailConfig, client_secret: impl Into<String>) -> Self {
        Self {
            config,
            client_secret: client_secret.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Consent URL requesting offline access
    pub fn auth_url(&self) -> Result<Url> {
        Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", self.config.scope.as_str()),
                ("access_type", "offline"),
                ("state", "state-token"),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid auth_url: {}", e)))
    }

    /// Exchange an authorization code for a credential
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        let response = self
            .post_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .await?;
        Ok(response.into_credential(""))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        if credential.refresh_token.is_empty() {
            return Err(Error::Auth("Credential has no refresh token".to_string()));
        }
        let response = self
            .post_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;
        Ok(response.into_credential(&credential.refresh_token))
    }
}

/// Extract the `code` query parameter from a redirected URL.
pub fn code_from_redirect(redirected: &str) -> Result<String> {
    let url = Url::parse(redirected.trim())
        .map_err(|e| Error::Auth(format!("Invalid redirect URL: {}", e)))?;
    url.query_pairs()
        .find(|(k, v)| k == "code" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| Error::Auth("code parameter not found in the URL".to_string()))
}

/// Prompts on the terminal: prints the consent URL and reads back the
/// redirected URL containing the authorization code.
pub struct ConsoleAuthorizer {
    oauth: Arc<OAuthClient>,
}

impl ConsoleAuthorizer {
    pub fn new(oauth: Arc<OAuthClient>) -> Self {
        Self { oauth }
    }
}

#[async_trait]
impl Authorizer for ConsoleAuthorizer {
    async fn authorize(&self) -> Result<Credential> {
        let url = self.oauth.auth_url()?;
        println!(
            "Go to the following link in your browser, authenticate Jot and then paste the \
             redirected url (containing 'code'):\n{}",
            url
        );

        let line = read_line_detached(|| std::io::stdin().lock()).await?;
        let code = code_from_redirect(&line)?;
        self.oauth.exchange_code(&code).await
    }
}

/// Read one line on a detached thread.
///
/// Dropping the returned future (e.g. on cancellation) abandons the read
/// without holding up runtime shutdown.
async fn read_line_detached<F, R>(open: F) -> Result<String>
where
    F: FnOnce() -> R + Send + 'static,
    R: BufRead,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let read = open().read_line(&mut line).map(|_| line);
        let _ = tx.send(read);
    });

    match rx.await {
        Ok(Ok(line)) => Ok(line),
        Ok(Err(e)) => Err(Error::Auth(format!("Unable to read authorization code: {}", e))),
        Err(_) => Err(Error::Auth("Authorization input closed".to_string())),
    }
}
