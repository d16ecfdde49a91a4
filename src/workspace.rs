use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tokio_stream::{StreamExt, wrappers::ReadDirStream};
use tracing::warn;

use crate::{
    article::{Article, FailToOpenArticle, is_valid_id},
    comment::CommentStore,
    markdown::{self, RenderOptions},
};

const ARTICLE_EXTENSION: &str = "md";

/// structure of the content root is as follows:
/// ```text
/// /content-root
/// ├── articles
/// │   ├── hello_world.md
/// │   ├── edge_detection.md
/// ├── comments
/// │   ├── hello_world.txt
/// ├── about
/// │   ├── about.md
/// │   ├── portrait.png
/// ```
#[derive(Debug, Clone)]
pub struct Workspace(Arc<WorkspaceInner>);

#[derive(Debug)]
struct WorkspaceInner {
    root: PathBuf,
    address: String,
    comments: CommentStore,
}

/// The rendered about page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct About {
    body: String,
}

impl About {
    /// Render about-page Markdown: no LaTeX protection, footnotes or TOC.
    #[must_use]
    pub fn from_markdown(source: &str) -> Self {
        Self {
            body: markdown::render(source, RenderOptions::page()),
        }
    }

    #[must_use]
    pub const fn title(&self) -> &'static str {
        "About"
    }

    #[must_use]
    pub const fn body(&self) -> &str {
        self.body.as_str()
    }
}

impl Workspace {
    /// Open the content root. `address` is the public site address used to
    /// build article links.
    pub fn new(root: impl Into<PathBuf>, address: impl Into<String>) -> Self {
        let root = root.into();
        let comments = CommentStore::new(root.join("comments"));
        Self(
            WorkspaceInner {
                root,
                address: address.into(),
                comments,
            }
            .into(),
        )
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.0.root
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.root().join("articles")
    }

    pub fn about_path(&self) -> PathBuf {
        self.root().join("about").join("about.md")
    }

    /// Store holding the comments of every article
    #[must_use]
    pub fn comments(&self) -> &CommentStore {
        &self.0.comments
    }

    fn article_path(&self, id: &str) -> PathBuf {
        self.articles_dir().join(format!("{id}.{ARTICLE_EXTENSION}"))
    }

    async fn load(&self, id: String, path: &Path) -> Result<Article, FailToOpenArticle> {
        let source = read_source(path).await?;
        let comments = self.comments().comments_or_empty(&id).await;
        Ok(Article::parse(id, &source)
            .with_link(&self.0.address)
            .with_comments(comments))
    }

    /// Load a single article together with its comments.
    ///
    /// # Errors
    /// Fails with [`FailToOpenArticle::InvalidId`] for ids outside
    /// `[a-zA-Z0-9_]`, [`FailToOpenArticle::NotFound`] if no such file exists.
    pub async fn article(&self, id: &str) -> Result<Article, FailToOpenArticle> {
        if !is_valid_id(id) {
            return Err(FailToOpenArticle::InvalidId(id.to_string()));
        }
        self.load(id.to_string(), &self.article_path(id)).await
    }

    /// List every article, newest first.
    ///
    /// Articles sharing a creation time keep the order of their ids. A file
    /// that cannot be read is skipped.
    ///
    /// # Errors
    /// Fails only if the articles directory exists but cannot be listed.
    pub async fn articles(&self) -> Result<Vec<Article>, FailToOpenArticle> {
        let dir = match fs::read_dir(self.articles_dir()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = ReadDirStream::new(dir);
        let mut found = Vec::new();
        while let Some(entry) = entries.next().await {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTICLE_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            found.push((id.to_string(), path.clone()));
        }
        found.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut articles = Vec::with_capacity(found.len());
        for (id, path) in found {
            match self.load(id, &path).await {
                Ok(article) => articles.push(article),
                Err(err) => warn!("Skipping article `{}`: {err}", path.display()),
            }
        }
        articles.sort_by(|a, b| b.created().cmp(&a.created()));
        Ok(articles)
    }

    /// List the articles carrying `tag`, newest first.
    ///
    /// # Errors
    /// See [`Workspace::articles`].
    pub async fn articles_by_tag(&self, tag: &str) -> Result<Vec<Article>, FailToOpenArticle> {
        Ok(crate::tag::filter_by_tag(self.articles().await?, tag))
    }

    /// Render the about page.
    ///
    /// # Errors
    /// Fails with [`FailToOpenArticle::NotFound`] if `about/about.md` is missing.
    pub async fn about(&self) -> Result<About, FailToOpenArticle> {
        let source = read_source(&self.about_path()).await?;
        Ok(About::from_markdown(&source))
    }
}

// Sources are decoded lossily, so a file in a legacy encoding still renders.
async fn read_source(path: &Path) -> Result<String, FailToOpenArticle> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(FailToOpenArticle::NotFound);
        }
        Err(err) => return Err(err.into()),
    };
    match String::from_utf8(bytes) {
        Ok(source) => Ok(source),
        Err(err) => {
            warn!(
                "`{}` is not valid UTF-8, replacing invalid bytes",
                path.display()
            );
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}
