//! Captcha verification for comment submissions.

use core::fmt::Debug;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Checks the challenge/response tokens a reader submitted with a comment.
pub trait CaptchaVerifier: Debug + Send + Sync {
    /// Ask the provider whether `response` solves `challenge`.
    fn verify<'a>(
        &'a self,
        challenge: &'a str,
        response: &'a str,
        remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<bool, CaptchaError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("Captcha request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// reCAPTCHA style verifier posting to a `siteverify` endpoint.
#[derive(Debug, Clone)]
pub struct Recaptcha {
    client: reqwest::Client,
    secret: String,
    verify_url: Url,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

impl Recaptcha {
    #[must_use]
    pub fn new(client: reqwest::Client, secret: impl Into<String>, verify_url: Url) -> Self {
        Self {
            client,
            secret: secret.into(),
            verify_url,
        }
    }
}

impl CaptchaVerifier for Recaptcha {
    fn verify<'a>(
        &'a self,
        challenge: &'a str,
        response: &'a str,
        remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<bool, CaptchaError>> {
        Box::pin(async move {
            let verdict: Verdict = self
                .client
                .post(self.verify_url.clone())
                .form(&[
                    ("secret", self.secret.as_str()),
                    ("response", response),
                    ("challenge", challenge),
                    ("remoteip", remote_ip),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if !verdict.success {
                debug!(codes = ?verdict.error_codes, "Captcha provider rejected the response");
            }
            Ok(verdict.success)
        })
    }
}
