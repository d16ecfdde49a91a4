//! Reader identity: the session cookie, the OAuth login flow and the admin check.

pub mod cookie;
pub mod oauth;
pub mod session;

pub use session::{LoginState, Session};

/// The identity allowed to act as site admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    email: String,
    id: String,
}

impl AdminIdentity {
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
}
