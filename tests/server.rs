use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use futures::future::BoxFuture;
use quire::{
    article::SEPARATOR,
    auth::Session,
    captcha::{CaptchaError, CaptchaVerifier},
    config::{AuthConfig, Config, SiteConfig},
    serve::{AppState, build_router},
};
use tempfile::TempDir;
use tower::ServiceExt;

const AUTH: &str = r#"
client_id = "cid"
client_secret = "csecret"
auth_url = "https://provider.example/auth"
redirect_url = "http://blog.example/oauth2callback"
cookie_auth_key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
cookie_encryption_key = "202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f"
admin_email = "owner@example.com"
admin_id = "1"
"#;

#[derive(Debug)]
struct AnswerCaptcha {
    answer: bool,
    calls: AtomicUsize,
}

impl CaptchaVerifier for AnswerCaptcha {
    fn verify<'a>(
        &'a self,
        _challenge: &'a str,
        _response: &'a str,
        _remote_ip: &'a str,
    ) -> BoxFuture<'a, Result<bool, CaptchaError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(self.answer) })
    }
}

struct Site {
    root: TempDir,
    state: AppState,
    captcha: Arc<AnswerCaptcha>,
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn write_article(root: &Path, id: &str, created: &str, tags: &[&str]) {
    let metadata = serde_json::json!({
        "Title": format!("Title of {id}"),
        "Description": format!("About {id}"),
        "DateCreated": created,
        "Tags": tags,
    });
    write(
        &root.join("articles").join(format!("{id}.md")),
        &format!("{metadata}\n{SEPARATOR}\n# Heading\n\nBody of {id}\n"),
    );
}

fn site(captcha_answer: bool) -> Site {
    site_with_auth(captcha_answer, AUTH)
}

fn site_with_auth(captcha_answer: bool, auth: &str) -> Site {
    let root = TempDir::new().unwrap();
    write_article(root.path(), "first", "2014-01-01 10:00", &["rust"]);
    write_article(root.path(), "second", "2015-01-01 10:00", &["rust", "Computer Vision"]);
    write_article(root.path(), "third", "2013-01-01 10:00", &["misc"]);
    write(&root.path().join("about").join("about.md"), "I write *things*.");
    write(&root.path().join("about").join("sub").join("pic.png"), "png");
    write(&root.path().join("secret.txt"), "top level");
    write(&root.path().join("static").join("style.css"), "body {}");

    let site: SiteConfig = toml::from_str(
        "title = \"Notes\"\nname = \"Owner\"\naddress = \"http://blog.example\"\n",
    )
    .unwrap();
    let site = site
        .with_content_root(root.path())
        .with_static_dir(root.path().join("static"));
    let auth: AuthConfig = toml::from_str(auth).unwrap();

    let captcha = Arc::new(AnswerCaptcha {
        answer: captcha_answer,
        calls: AtomicUsize::new(0),
    });
    let state = AppState::from_config(&Config::new(site, auth))
        .unwrap()
        .with_captcha(captcha.clone());
    Site {
        root,
        state,
        captcha,
    }
}

async fn send(state: &AppState, request: Request<Body>) -> Response {
    build_router(state.clone()).oneshot(request).await.unwrap()
}

async fn get(state: &AppState, uri: &str) -> Response {
    send(state, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_form(state: &AppState, uri: &str, form: &str) -> Response {
    send(
        state,
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap(),
    )
    .await
}

async fn text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn listing_pages() {
    let site = site(true);
    for uri in ["/", "/articles/"] {
        let response = get(&site.state, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = text(response).await;
        let second = html.find("Title of second").unwrap();
        let first = html.find("Title of first").unwrap();
        assert!(html.contains("Title of third"));
        assert!(second < first);
    }
}

#[tokio::test]
async fn article_page() {
    let site = site(true);
    let response = get(&site.state, "/article/first").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = text(response).await;
    assert!(html.contains("<title>Title of first - Notes</title>"));
    assert!(html.contains("Body of first"));
    assert!(html.contains("href=\"/tag/rust\""));

    assert_eq!(
        get(&site.state, "/article/missing").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        get(&site.state, "/article/not-valid").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn legacy_encoded_article_still_renders() {
    let site = site(true);
    let mut source = br#"{"Title": "Caf"#.to_vec();
    source.push(0xE9);
    source.extend_from_slice(
        format!("\", \"DateCreated\": \"2012-01-01 10:00\"}}\n{SEPARATOR}\nOld post\n").as_bytes(),
    );
    std::fs::write(site.root.path().join("articles").join("latin.md"), source).unwrap();

    let response = get(&site.state, "/article/latin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(text(response).await.contains("Old post"));

    let listing = text(get(&site.state, "/").await).await;
    assert!(listing.contains("/article/latin"), "{listing}");
}

#[tokio::test]
async fn comment_is_stored_after_captcha() {
    let site = site(true);
    let response = post_form(
        &site.state,
        "/article/first",
        "user=Reader&comment=Nice+post&recaptcha_challenge_field=c&recaptcha_response_field=r",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = text(response).await;
    assert!(html.contains("Nice post"));
    assert!(html.contains("your comment was added"));
    assert_eq!(site.captcha.calls.load(Ordering::SeqCst), 1);

    let stored =
        std::fs::read_to_string(site.root.path().join("comments").join("first.txt")).unwrap();
    assert!(stored.contains("\"Name\": \"Reader\""));

    let html = text(get(&site.state, "/article/first").await).await;
    assert!(html.contains("Nice post"));
}

#[tokio::test]
async fn rejected_captcha_keeps_form() {
    let site = site(false);
    let html = text(
        post_form(
            &site.state,
            "/article/first",
            "user=Reader&comment=Spam&recaptcha_challenge_field=c&recaptcha_response_field=r",
        )
        .await,
    )
    .await;
    assert!(html.contains("captcha was not solved"));
    assert!(html.contains("value=\"Reader\""));
    assert!(!site.root.path().join("comments").join("first.txt").exists());
}

#[tokio::test]
async fn empty_form_is_ignored() {
    let site = site(true);
    let response = post_form(&site.state, "/article/first", "user=&comment=").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(site.captcha.calls.load(Ordering::SeqCst), 0);
    assert!(!site.root.path().join("comments").join("first.txt").exists());
}

#[tokio::test]
async fn comment_on_missing_article_is_not_found() {
    let site = site(true);
    let response = post_form(&site.state, "/article/missing", "user=a&comment=b").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn about_page() {
    let site = site(true);
    let html = text(get(&site.state, "/about/").await).await;
    assert!(html.contains("<em>things</em>"));

    std::fs::remove_file(site.root.path().join("about").join("about.md")).unwrap();
    assert_eq!(
        get(&site.state, "/about/").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn tag_pages() {
    let site = site(true);
    let html = text(get(&site.state, "/tag/rust").await).await;
    assert!(html.contains("Title of first"));
    assert!(html.contains("Title of second"));
    assert!(!html.contains("Title of third"));

    let html = text(get(&site.state, "/tag/Computer%20Vision").await).await;
    assert!(html.contains("Title of second"));
    assert!(!html.contains("Title of first"));

    let response = get(&site.state, "/tag/unused").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(text(response).await.contains("Nothing here yet"));

    assert_eq!(
        get(&site.state, "/tag/c++").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn feeds() {
    let site = site(true);
    let response = get(&site.state, "/rss").await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/rss+xml"
    );
    let rss = text(response).await;
    assert!(rss.contains("<title>Notes</title>"));
    assert!(rss.contains("http://blog.example/article/second"));
    assert!(rss.contains("Owner&apos;s blog") || rss.contains("Owner's blog"));

    let response = get(&site.state, "/atom.xml").await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/atom+xml"
    );
    let atom = text(response).await;
    assert!(atom.contains("Title of third"));
}

#[tokio::test]
async fn login_and_logout() {
    let site = site(true);
    let response = get(&site.state, "/login").await;
    assert!(response.status().is_redirection());
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://provider.example/auth?response_type=code"));
    assert!(location.contains("client_id=cid"));
    assert!(location.contains("&state="));
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("quire_login_state="));

    let response = get(&site.state, "/logout").await;
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()[header::LOCATION], "/");
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("quire_session=deleted;"));
    assert!(cookie.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
}

#[tokio::test]
async fn callback_without_code_stays_anonymous() {
    let site = site(true);
    let response = get(&site.state, "/oauth2callback?error=access_denied").await;
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()[header::LOCATION], "/");
    assert!(session_cookie(&response).is_none());
}

fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("quire_session="))
        .map(str::to_string)
}

// Starts a login and returns the `state` sent to the provider plus the cookie pair to send back.
async fn start_login(state: &AppState) -> (String, String) {
    let response = get(state, "/login").await;
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let login_state = url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find_map(|(key, value)| (key == "state").then(|| value.into_owned()))
        .unwrap();
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    (login_state, cookie)
}

async fn callback(state: &AppState, query: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::get(format!("/oauth2callback?{query}"));
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send(state, request.body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn callback_requires_the_login_state() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "tok"}"#)
        .expect(1)
        .create_async()
        .await;
    let _profile = server
        .mock("GET", "/me")
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "1", "emails": [{"value": "owner@example.com"}]}"#)
        .create_async()
        .await;
    let auth = format!(
        "{AUTH}token_url = \"{url}/token\"\nprofile_url = \"{url}/me\"\n",
        url = server.url()
    );
    let site = site_with_auth(true, &auth);
    let (login_state, cookie) = start_login(&site.state).await;

    let forged = callback(&site.state, "code=abc&state=forged", Some(&cookie)).await;
    assert!(session_cookie(&forged).is_none());
    let missing = callback(&site.state, &format!("code=abc&state={login_state}"), None).await;
    assert!(session_cookie(&missing).is_none());

    let response = callback(
        &site.state,
        &format!("code=abc&state={login_state}"),
        Some(&cookie),
    )
    .await;
    assert_eq!(response.headers()[header::LOCATION], "/");
    let session = session_cookie(&response).unwrap();
    assert!(
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .any(|value| value.to_str().unwrap().starts_with("quire_login_state=deleted"))
    );

    let pair = session.split(';').next().unwrap().to_string();
    let html = text(
        send(
            &site.state,
            Request::get("/")
                .header(header::COOKIE, pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert!(html.contains("/logout"), "{html}");
    token.assert_async().await;
}

#[tokio::test]
async fn admin_cookie_unlocks_admin_view() {
    let site = site(true);
    let set_cookie = Session::new("owner@example.com", "1")
        .to_set_cookie(site.state.cookies())
        .unwrap();
    let pair = set_cookie.split(';').next().unwrap().to_string();

    let response = send(
        &site.state,
        Request::get("/article/first")
            .header(header::COOKIE, pair)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let html = text(response).await;
    assert!(html.contains("admin-badge"));
    assert!(html.contains("articles/first.md"));
    assert!(html.contains("href=\"/logout\""));

    let html = text(get(&site.state, "/article/first").await).await;
    assert!(!html.contains("admin-badge"));
    assert!(html.contains("href=\"/login\""));
}

#[tokio::test]
async fn static_files() {
    let site = site(true);
    let response = get(&site.state, "/static/style.css").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(text(response).await, "body {}");

    for uri in [
        "/static/",
        "/static/missing.css",
        "/static/css/",
        "/static/../secret.txt",
    ] {
        assert_eq!(
            get(&site.state, uri).await.status(),
            StatusCode::NOT_FOUND,
            "{uri}"
        );
    }
}

#[tokio::test]
async fn content_static_files() {
    let site = site(true);
    let response = get(&site.state, "/content_static/about/sub/pic.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    for uri in [
        "/content_static/secret.txt",
        "/content_static/articles/first.md",
        "/content_static/about/about.md",
        "/content_static/about/sub/",
        "/content_static/about/",
        "/content_static/about/../secret.txt",
    ] {
        assert_eq!(
            get(&site.state, uri).await.status(),
            StatusCode::NOT_FOUND,
            "{uri}"
        );
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let site = site(true);
    assert_eq!(
        get(&site.state, "/nothing/here").await.status(),
        StatusCode::NOT_FOUND
    );
}
