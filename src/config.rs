//! Site and auth settings.
//!
//! Both files live in the configuration directory and are read once at
//! startup:
//! ```plain
//! /config-dir
//! ├── Site.toml   <--- title, author, content root, analytics, captcha
//! └── Auth.toml   <--- OAuth client, cookie keys, admin identity
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tokio::fs;
use url::Url;
use whoami::realname;

use crate::auth::{AdminIdentity, cookie::SecureCookie};

pub const SITE_FILE: &str = "Site.toml";
pub const AUTH_FILE: &str = "Auth.toml";

#[derive(Debug, thiserror::Error)]
pub enum FailToLoadConfig {
    #[error("Cannot read `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config `{path}`: {source}")]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("`{field}` is not valid hex: {source}")]
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
    #[error("Invalid cookie keys: {0}")]
    InvalidKeys(#[from] crate::auth::cookie::InvalidKey),
}

/// Everything read from the configuration directory.
#[derive(Debug, Clone)]
pub struct Config {
    site: SiteConfig,
    auth: AuthConfig,
}

impl Config {
    /// Load `Site.toml` and `Auth.toml` from `dir`.
    ///
    /// Relative paths in `Site.toml` are resolved against `dir`.
    ///
    /// # Errors
    /// Fails if either file is missing or invalid, or if the cookie keys do
    /// not decode to usable keys.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, FailToLoadConfig> {
        let dir = dir.as_ref();
        let mut site: SiteConfig = read_toml(&dir.join(SITE_FILE)).await?;
        site.content_root = dir.join(&site.content_root);
        site.static_dir = dir.join(&site.static_dir);

        let auth: AuthConfig = read_toml(&dir.join(AUTH_FILE)).await?;
        auth.secure_cookie()?;

        Ok(Self { site, auth })
    }

    #[must_use]
    pub const fn new(site: SiteConfig, auth: AuthConfig) -> Self {
        Self { site, auth }
    }

    #[must_use]
    pub const fn site(&self) -> &SiteConfig {
        &self.site
    }

    #[must_use]
    pub const fn auth(&self) -> &AuthConfig {
        &self.auth
    }
}

async fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, FailToLoadConfig> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| FailToLoadConfig::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| FailToLoadConfig::InvalidConfig {
        path: path.to_path_buf(),
        source,
    })
}

/// Site-wide settings (`Site.toml`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    title: String,
    name: String,
    address: String,
    email: String,
    description: Option<String>,
    content_root: PathBuf,
    static_dir: PathBuf,
    analytics: AnalyticsConfig,
    captcha: CaptchaConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    pub public_key: String,
    pub private_key: String,
    pub verify_url: Url,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            private_key: String::new(),
            verify_url: google_url("https://www.google.com/recaptcha/api/siteverify"),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Quire".to_string(),
            name: realname(),
            address: "http://127.0.0.1:8080".to_string(),
            email: String::new(),
            description: None,
            content_root: PathBuf::from("."),
            static_dir: PathBuf::from("static"),
            analytics: AnalyticsConfig::default(),
            captcha: CaptchaConfig::default(),
        }
    }
}

impl SiteConfig {
    #[must_use]
    pub const fn title(&self) -> &str {
        self.title.as_str()
    }

    /// Name of the author
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Public address of the site, used for absolute links
    #[must_use]
    pub const fn address(&self) -> &str {
        self.address.as_str()
    }

    #[must_use]
    pub const fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Configured description, or "`<name>`'s blog"
    #[must_use]
    pub fn description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("{}'s blog", self.name))
    }

    #[must_use]
    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    #[must_use]
    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    #[must_use]
    pub const fn analytics(&self) -> &AnalyticsConfig {
        &self.analytics
    }

    #[must_use]
    pub const fn captcha(&self) -> &CaptchaConfig {
        &self.captcha
    }

    #[must_use]
    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = root.into();
        self
    }

    #[must_use]
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

/// OAuth client, cookie keys and the admin identity (`Auth.toml`)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_auth_url")]
    auth_url: Url,
    #[serde(default = "default_token_url")]
    token_url: Url,
    #[serde(default = "default_profile_url")]
    profile_url: Url,
    #[serde(default = "default_redirect_url")]
    redirect_url: Url,
    #[serde(default = "default_scope")]
    scope: String,
    cookie_auth_key: String,
    cookie_encryption_key: String,
    admin_email: String,
    admin_id: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn google_url(url: &str) -> Url {
    Url::parse(url).expect("built-in URLs are valid")
}

fn default_auth_url() -> Url {
    google_url("https://accounts.google.com/o/oauth2/auth")
}

fn default_token_url() -> Url {
    google_url("https://accounts.google.com/o/oauth2/token")
}

fn default_profile_url() -> Url {
    google_url("https://www.googleapis.com/plus/v1/people/me")
}

fn default_redirect_url() -> Url {
    google_url("http://127.0.0.1:8080/oauth2callback")
}

fn default_scope() -> String {
    "email".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

impl AuthConfig {
    #[must_use]
    pub const fn client_id(&self) -> &str {
        self.client_id.as_str()
    }

    #[must_use]
    pub const fn client_secret(&self) -> &str {
        self.client_secret.as_str()
    }

    #[must_use]
    pub const fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub const fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub const fn profile_url(&self) -> &Url {
        &self.profile_url
    }

    #[must_use]
    pub const fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    #[must_use]
    pub const fn scope(&self) -> &str {
        self.scope.as_str()
    }

    /// Timeout applied to every outbound call (OAuth provider, captcha)
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn admin(&self) -> AdminIdentity {
        AdminIdentity::new(&self.admin_email, &self.admin_id)
    }

    /// Build the cookie codec from the hex-encoded keys.
    ///
    /// # Errors
    /// Fails if a key is not hex or has an unusable length.
    pub fn secure_cookie(&self) -> Result<SecureCookie, FailToLoadConfig> {
        let auth_key =
            hex::decode(&self.cookie_auth_key).map_err(|source| FailToLoadConfig::InvalidHex {
                field: "cookie_auth_key",
                source,
            })?;
        let encryption_key = hex::decode(&self.cookie_encryption_key).map_err(|source| {
            FailToLoadConfig::InvalidHex {
                field: "cookie_encryption_key",
                source,
            }
        })?;
        Ok(SecureCookie::new(&auth_key, &encryption_key)?)
    }
}
