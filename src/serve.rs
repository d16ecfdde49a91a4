use std::{
    io,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use askama::Template;
use axum::{
    Form, Router,
    extract::{ConnectInfo, Path as UrlPath, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{self, SET_COOKIE},
    },
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use color_eyre::eyre::{self, Report};
use serde::Deserialize;
use tokio::{fs as async_fs, net::TcpListener};
use tracing::{error, info, warn};

use crate::{
    article::FailToOpenArticle,
    auth::{
        AdminIdentity, LoginState, Session,
        cookie::SecureCookie,
        oauth::OAuthClient,
        session::{clear_login_state_cookie, logout_cookie},
    },
    captcha::{CaptchaVerifier, Recaptcha},
    comment::{self, CommentForm, Submission},
    config::Config,
    feed::{Feed, FailToBuildFeed},
    page::{AboutPage, ArticlePage, ListingPage, SiteContext, TagPage, Viewer},
    tag::{Columns, is_valid_tag},
    workspace::Workspace,
};

const RSS_CONTENT_TYPE: &str = "application/rss+xml";
const ATOM_CONTENT_TYPE: &str = "application/atom+xml";

/// Everything a request handler needs, cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState(Arc<AppStateInner>);

#[derive(Debug, Clone)]
struct AppStateInner {
    site: Arc<SiteContext>,
    workspace: Workspace,
    static_dir: PathBuf,
    cookies: SecureCookie,
    admin: AdminIdentity,
    oauth: OAuthClient,
    captcha: Arc<dyn CaptchaVerifier>,
}

impl AppState {
    /// Build the server state from loaded configuration.
    ///
    /// OAuth and captcha calls share one HTTP client bounded by the
    /// configured timeout.
    ///
    /// # Errors
    /// Fails if the cookie keys are unusable or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.auth().timeout())
            .build()?;
        let site = config.site();
        let captcha = Recaptcha::new(
            http.clone(),
            site.captcha().private_key.clone(),
            site.captcha().verify_url.clone(),
        );

        Ok(Self(Arc::new(AppStateInner {
            site: Arc::new(SiteContext::from_config(site)),
            workspace: Workspace::new(site.content_root(), site.address()),
            static_dir: site.static_dir().to_path_buf(),
            cookies: config.auth().secure_cookie()?,
            admin: config.auth().admin(),
            oauth: OAuthClient::new(http, config.auth()),
            captcha: Arc::new(captcha),
        })))
    }

    /// Replace the captcha verifier.
    #[must_use]
    pub fn with_captcha(self, captcha: Arc<dyn CaptchaVerifier>) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.0);
        inner.captcha = captcha;
        Self(Arc::new(inner))
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.0.workspace
    }

    #[must_use]
    pub fn cookies(&self) -> &SecureCookie {
        &self.0.cookies
    }

    fn viewer(&self, headers: &HeaderMap) -> Viewer {
        Viewer::new(Session::from_headers(&self.0.cookies, headers), &self.0.admin)
    }
}

/// Bind `host:port` and serve until the process is stopped.
///
/// # Errors
/// Fails if the address cannot be bound or the server stops with an error.
pub async fn serve(state: AppState, host: &str, port: u16) -> eyre::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Serving on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// All routes of the site.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(listing_handler))
        .route("/articles/", get(listing_handler))
        .route("/article/:id", get(article_handler).post(comment_handler))
        .route("/about/", get(about_handler))
        .route("/tag/:tag", get(tag_handler))
        .route("/atom.xml", get(atom_handler))
        .route("/rss", get(rss_handler))
        .route("/login", get(login_handler))
        .route("/logout", get(logout_handler))
        .route("/oauth2callback", get(oauth_callback_handler))
        .route("/static/*path", get(static_handler))
        .route("/content_static/*path", get(content_static_handler))
        .fallback(|| async { ServeError::NotFound })
        .with_state(state)
}

async fn listing_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, ServeError> {
    let articles = state.0.workspace.articles().await?;
    render(&ListingPage {
        site: state.0.site.clone(),
        viewer: state.viewer(&headers),
        columns: Columns::split(articles),
    })
}

async fn article_handler(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Html<String>, ServeError> {
    let article = state.0.workspace.article(&id).await?;
    render(&ArticlePage {
        site: state.0.site.clone(),
        viewer: state.viewer(&headers),
        article,
        submission: Submission::not_attempted(),
    })
}

async fn comment_handler(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Form(form): Form<CommentForm>,
) -> Result<Html<String>, ServeError> {
    let mut article = state.0.workspace.article(&id).await?;
    let remote_ip = remote
        .map(|ConnectInfo(address)| address.ip().to_string())
        .unwrap_or_default();

    let store = state.0.workspace.comments();
    let submission =
        comment::submit(store, state.0.captcha.as_ref(), &id, form, &remote_ip).await;
    if submission.is_added() {
        article.set_comments(store.comments_or_empty(&id).await);
    }

    render(&ArticlePage {
        site: state.0.site.clone(),
        viewer: state.viewer(&headers),
        article,
        submission,
    })
}

async fn about_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, ServeError> {
    let about = state.0.workspace.about().await?;
    render(&AboutPage {
        site: state.0.site.clone(),
        viewer: state.viewer(&headers),
        about,
    })
}

async fn tag_handler(
    State(state): State<AppState>,
    UrlPath(tag): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Html<String>, ServeError> {
    if !is_valid_tag(&tag) {
        return Err(ServeError::NotFound);
    }
    let articles = state.0.workspace.articles_by_tag(&tag).await?;
    render(&TagPage {
        site: state.0.site.clone(),
        viewer: state.viewer(&headers),
        tag,
        columns: Columns::split(articles),
    })
}

async fn feed(state: &AppState) -> Result<Feed, ServeError> {
    let articles = state.0.workspace.articles().await?;
    Ok(Feed::from_articles(&state.0.site, &articles))
}

async fn rss_handler(State(state): State<AppState>) -> Result<Response, ServeError> {
    let body = feed(&state).await?.to_rss()?;
    Ok(([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], body).into_response())
}

async fn atom_handler(State(state): State<AppState>) -> Result<Response, ServeError> {
    let body = feed(&state).await?.to_atom()?;
    Ok(([(header::CONTENT_TYPE, ATOM_CONTENT_TYPE)], body).into_response())
}

async fn login_handler(State(state): State<AppState>) -> Response {
    let login = LoginState::generate();
    let redirect = Redirect::to(state.0.oauth.authorize_url(login.as_str()).as_str());
    match login.to_set_cookie(&state.0.cookies) {
        Ok(cookie) => with_cookie(&cookie, redirect),
        Err(err) => {
            warn!("Cannot remember login state: {err}");
            Redirect::to("/").into_response()
        }
    }
}

async fn logout_handler() -> Response {
    with_cookie(&logout_cookie(), Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    state: Option<String>,
}

async fn oauth_callback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let home = with_cookie(&clear_login_state_cookie(), Redirect::to("/"));
    let Some(code) = params.code else {
        warn!(
            "OAuth callback without a code: {}",
            params.error.as_deref().unwrap_or("no error given")
        );
        return home;
    };
    let started = LoginState::from_headers(&state.0.cookies, &headers);
    if !started.is_some_and(|started| started.matches(params.state.as_deref())) {
        warn!("OAuth callback does not match a login started by this browser");
        return home;
    }

    let session = match state.0.oauth.authenticate(&code).await {
        Ok(session) => session,
        Err(err) => {
            warn!("Login failed: {err}");
            return home;
        }
    };
    match session.to_set_cookie(&state.0.cookies) {
        Ok(cookie) => {
            info!(
                admin = session.is_admin(&state.0.admin),
                "Logged in {}",
                session.email()
            );
            with_cookie(&cookie, home)
        }
        Err(err) => {
            warn!("Cannot issue session cookie: {err}");
            home
        }
    }
}

fn with_cookie(cookie: &str, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => warn!("Dropping invalid Set-Cookie header: {err}"),
    }
    response
}

async fn static_handler(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ServeError> {
    let relative = sanitize_relative_path(&path).ok_or(ServeError::NotFound)?;
    serve_file(&state.0.static_dir.join(relative)).await
}

async fn content_static_handler(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ServeError> {
    let relative = sanitize_relative_path(&path).ok_or(ServeError::NotFound)?;
    // only files nested inside a content folder, so `articles/<id>.md` stays private
    if relative.components().count() < 3 {
        return Err(ServeError::NotFound);
    }
    serve_file(&state.0.workspace.root().join(relative)).await
}

async fn serve_file(path: &Path) -> Result<Response, ServeError> {
    let metadata = async_fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(ServeError::NotFound);
    }
    let data = async_fs::read(path).await?;
    let mut response = data.into_response();
    if let Some(value) = guess_content_type(path) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

fn render(page: &impl Template) -> Result<Html<String>, ServeError> {
    Ok(Html(page.render().map_err(ServeError::internal)?))
}

#[derive(Debug)]
pub enum ServeError {
    NotFound,
    Internal(Report),
}

impl ServeError {
    fn internal(err: impl Into<Report>) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            Self::Internal(report) => {
                error!("{report:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<FailToOpenArticle> for ServeError {
    fn from(err: FailToOpenArticle) -> Self {
        match err {
            FailToOpenArticle::NotFound | FailToOpenArticle::InvalidId(_) => Self::NotFound,
            FailToOpenArticle::Io(inner) => Self::from(inner),
        }
    }
}

impl From<FailToBuildFeed> for ServeError {
    fn from(err: FailToBuildFeed) -> Self {
        Self::internal(err)
    }
}

impl From<io::Error> for ServeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::internal(err)
        }
    }
}

/// Turn a URL path into a relative file path.
///
/// Empty paths, directory paths (trailing `/`) and any `..` are refused.
fn sanitize_relative_path(path: &str) -> Option<PathBuf> {
    if path.is_empty() || path.ends_with('/') {
        return None;
    }
    let mut buf = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(segment) => buf.push(segment),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    (!buf.as_os_str().is_empty()).then_some(buf)
}

fn guess_content_type(path: &Path) -> Option<HeaderValue> {
    mime_guess::from_path(path)
        .first_raw()
        .and_then(|mime| HeaderValue::from_str(mime).ok())
}
