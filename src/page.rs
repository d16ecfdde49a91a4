//! Page data handed to the askama templates under `templates/`.

use std::sync::Arc;

use askama::Template;

use crate::{
    article::Article,
    auth::{AdminIdentity, Session},
    comment::Submission,
    config::SiteConfig,
    tag::Columns,
    workspace::About,
};

/// Site-wide values shared by every page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    title: String,
    name: String,
    address: String,
    email: String,
    description: String,
    analytics_enabled: bool,
    analytics_code: String,
    captcha_public_key: String,
}

impl SiteContext {
    #[must_use]
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            title: config.title().to_string(),
            name: config.name().to_string(),
            address: config.address().trim_end_matches('/').to_string(),
            email: config.email().to_string(),
            description: config.description(),
            analytics_enabled: config.analytics().enabled,
            analytics_code: config.analytics().code.clone(),
            captcha_public_key: config.captcha().public_key.clone(),
        }
    }

    /// Base of every page title
    #[must_use]
    pub const fn title(&self) -> &str {
        self.title.as_str()
    }

    /// Name of the author
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub const fn address(&self) -> &str {
        self.address.as_str()
    }

    #[must_use]
    pub const fn email(&self) -> &str {
        self.email.as_str()
    }

    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }

    #[must_use]
    pub const fn analytics_enabled(&self) -> bool {
        self.analytics_enabled
    }

    #[must_use]
    pub const fn analytics_code(&self) -> &str {
        self.analytics_code.as_str()
    }

    #[must_use]
    pub const fn captcha_public_key(&self) -> &str {
        self.captcha_public_key.as_str()
    }
}

/// Who is looking at a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    session: Session,
    admin: bool,
}

impl Viewer {
    #[must_use]
    pub fn new(session: Session, admin: &AdminIdentity) -> Self {
        let is_admin = session.is_admin(admin);
        Self {
            session,
            admin: is_admin,
        }
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        !self.session.is_anonymous()
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.admin
    }
}

/// `/` and `/articles/`: every article in two columns
#[derive(Debug, Template)]
#[template(path = "articles.html")]
pub struct ListingPage {
    pub site: Arc<SiteContext>,
    pub viewer: Viewer,
    pub columns: Columns<Article>,
}

/// `/article/{id}`
#[derive(Debug, Template)]
#[template(path = "article.html")]
pub struct ArticlePage {
    pub site: Arc<SiteContext>,
    pub viewer: Viewer,
    pub article: Article,
    pub submission: Submission,
}

/// `/about/`
#[derive(Debug, Template)]
#[template(path = "about.html")]
pub struct AboutPage {
    pub site: Arc<SiteContext>,
    pub viewer: Viewer,
    pub about: About,
}

/// `/tag/{tag}`
#[derive(Debug, Template)]
#[template(path = "tag.html")]
pub struct TagPage {
    pub site: Arc<SiteContext>,
    pub viewer: Viewer,
    pub tag: String,
    pub columns: Columns<Article>,
}
