use axum::http::{HeaderMap, header::COOKIE};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::{
    Duration, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description,
};
use tracing::{debug, warn};

use super::{
    AdminIdentity,
    cookie::{FailToEncodeCookie, SecureCookie},
};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "quire_session";

/// Cookie value left behind by a logout
pub const LOGGED_OUT: &str = "deleted";

/// How long a login lasts
pub const SESSION_LIFETIME: Duration = Duration::days(1);

/// Name of the cookie binding an OAuth callback to the browser that started the login
pub const LOGIN_STATE_COOKIE: &str = "quire_login_state";

/// How long a started login may take to come back
pub const LOGIN_STATE_LIFETIME: Duration = Duration::minutes(10);

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionPayload {
    #[serde(rename = "UserEmail", default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(rename = "UserId", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

/// The identity of whoever sent a request. Anonymous is the empty pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    email: String,
    id: String,
}

impl Session {
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            email: String::new(),
            id: String::new(),
        }
    }

    pub fn new(email: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub const fn email(&self) -> &str {
        self.email.as_str()
    }

    #[must_use]
    pub const fn id(&self) -> &str {
        self.id.as_str()
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.email.is_empty() && self.id.is_empty()
    }

    /// Whether this session belongs to the site admin.
    ///
    /// Both email and id must match exactly, and an empty id never matches.
    #[must_use]
    pub fn is_admin(&self, admin: &AdminIdentity) -> bool {
        !self.id.is_empty() && self.email == admin.email() && self.id == admin.id()
    }

    /// Decode a session cookie value. Anything that is not a valid, complete
    /// session yields an anonymous one.
    #[must_use]
    pub fn from_cookie_value(codec: &SecureCookie, value: &str) -> Self {
        if value == LOGGED_OUT {
            return Self::anonymous();
        }
        let payload: SessionPayload = match codec.decode(SESSION_COOKIE, value) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("Ignoring session cookie: {err}");
                return Self::anonymous();
            }
        };
        match (payload.email, payload.id) {
            (Some(email), Some(id)) => Self { email, id },
            _ => {
                warn!("Session cookie lacks an email or id");
                Self::anonymous()
            }
        }
    }

    /// Read the session from the `Cookie` headers of a request.
    #[must_use]
    pub fn from_headers(codec: &SecureCookie, headers: &HeaderMap) -> Self {
        cookie_value(headers, SESSION_COOKIE)
            .map_or_else(Self::anonymous, |value| Self::from_cookie_value(codec, value))
    }

    /// `Set-Cookie` header value carrying this session.
    ///
    /// # Errors
    /// Fails if the session cannot be encoded.
    pub fn to_set_cookie(&self, codec: &SecureCookie) -> Result<String, FailToEncodeCookie> {
        let value = codec.encode(
            SESSION_COOKIE,
            &SessionPayload {
                email: Some(self.email.clone()),
                id: Some(self.id.clone()),
            },
        )?;
        let expires = OffsetDateTime::now_utc() + SESSION_LIFETIME;
        Ok(set_cookie(
            SESSION_COOKIE,
            &value,
            expires,
            SESSION_LIFETIME.whole_seconds(),
        ))
    }
}

/// `Set-Cookie` header value that ends the session.
#[must_use]
pub fn logout_cookie() -> String {
    set_cookie(SESSION_COOKIE, LOGGED_OUT, OffsetDateTime::UNIX_EPOCH, 0)
}

/// The `state` value of one OAuth login attempt.
///
/// It travels to the provider in the authorize URL and back in the callback,
/// and is kept in a sealed cookie in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginState(String);

impl LoginState {
    /// A fresh random state.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// `Set-Cookie` header value remembering this state.
    ///
    /// # Errors
    /// Fails if the state cannot be encoded.
    pub fn to_set_cookie(&self, codec: &SecureCookie) -> Result<String, FailToEncodeCookie> {
        let value = codec.encode(LOGIN_STATE_COOKIE, &self.0)?;
        let expires = OffsetDateTime::now_utc() + LOGIN_STATE_LIFETIME;
        Ok(set_cookie(
            LOGIN_STATE_COOKIE,
            &value,
            expires,
            LOGIN_STATE_LIFETIME.whole_seconds(),
        ))
    }

    /// Read the state remembered for this browser, if any.
    #[must_use]
    pub fn from_headers(codec: &SecureCookie, headers: &HeaderMap) -> Option<Self> {
        let value = cookie_value(headers, LOGIN_STATE_COOKIE)?;
        match codec.decode::<String>(LOGIN_STATE_COOKIE, value) {
            Ok(state) => Some(Self(state)),
            Err(err) => {
                debug!("Ignoring login state cookie: {err}");
                None
            }
        }
    }

    /// Whether the `state` returned by the provider is this one.
    #[must_use]
    pub fn matches(&self, returned: Option<&str>) -> bool {
        returned.is_some_and(|returned| !self.0.is_empty() && returned == self.0)
    }
}

/// `Set-Cookie` header value that forgets the login state.
#[must_use]
pub fn clear_login_state_cookie() -> String {
    set_cookie(LOGIN_STATE_COOKIE, LOGGED_OUT, OffsetDateTime::UNIX_EPOCH, 0)
}

fn set_cookie(name: &str, value: &str, expires: OffsetDateTime, max_age: i64) -> String {
    let mut header = format!("{name}={value}; Path=/");
    // formatting only fails for years outside 0..=9999
    if let Ok(expires) = expires.format(HTTP_DATE) {
        header.push_str("; Expires=");
        header.push_str(&expires);
    }
    header.push_str(&format!("; Max-Age={max_age}; HttpOnly; SameSite=Lax"));
    header
}

/// Find the value of cookie `name` in the request headers.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(key, value)| (key == name).then_some(value))
}
