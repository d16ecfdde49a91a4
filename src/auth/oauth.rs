//! Authorization-code login against an external OAuth provider.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::Session;
use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum FailToAuthenticate {
    #[error("Request to the OAuth provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Provider returned no access token")]
    MissingToken,
    #[error("Profile must list exactly one email, found {0}")]
    EmailCount(usize),
    #[error("Profile has no user id")]
    MissingId,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// An email address listed in a user profile
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProfileEmail {
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// The part of the provider's user profile used for login
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub emails: Vec<ProfileEmail>,
    #[serde(default)]
    pub id: String,
}

impl Profile {
    /// Turn the profile into a session.
    ///
    /// # Errors
    /// Fails unless the profile has an id and exactly one email.
    pub fn into_session(self) -> Result<Session, FailToAuthenticate> {
        if self.id.is_empty() {
            return Err(FailToAuthenticate::MissingId);
        }
        let count = self.emails.len();
        let mut emails = self.emails.into_iter();
        match (emails.next(), emails.next()) {
            (Some(email), None) => Ok(Session::new(email.value, self.id)),
            _ => Err(FailToAuthenticate::EmailCount(count)),
        }
    }
}

/// OAuth client used by the login routes.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: Url,
    token_url: Url,
    profile_url: Url,
    redirect_url: Url,
    scope: String,
}

impl OAuthClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: &AuthConfig) -> Self {
        Self {
            http,
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().to_string(),
            auth_url: config.auth_url().clone(),
            token_url: config.token_url().clone(),
            profile_url: config.profile_url().clone(),
            redirect_url: config.redirect_url().clone(),
            scope: config.scope().to_string(),
        }
    }

    /// Where to send the browser to start a login. The provider echoes
    /// `state` back to the callback.
    #[must_use]
    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_url.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url
    }

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    /// Fails if the provider cannot be reached or returns no token.
    pub async fn exchange(&self, code: &str) -> Result<String, FailToAuthenticate> {
        let token: TokenResponse = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if token.access_token.is_empty() {
            return Err(FailToAuthenticate::MissingToken);
        }
        Ok(token.access_token)
    }

    /// Fetch the profile of the user owning `token`.
    ///
    /// # Errors
    /// Fails if the request fails or the body is not a profile.
    pub async fn profile(&self, token: &str) -> Result<Profile, FailToAuthenticate> {
        Ok(self
            .http
            .get(self.profile_url.clone())
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Run the callback half of the flow: code to token to profile to session.
    ///
    /// # Errors
    /// See [`OAuthClient::exchange`], [`OAuthClient::profile`] and
    /// [`Profile::into_session`].
    pub async fn authenticate(&self, code: &str) -> Result<Session, FailToAuthenticate> {
        let token = self.exchange(code).await?;
        let profile = self.profile(&token).await?;
        debug!(id = %profile.id, "Fetched OAuth profile");
        profile.into_session()
    }
}
