use serde::Serialize;

use crate::{
    comment::Comment,
    markdown::{self, RenderOptions},
    metadata::ArticleMetadata,
    stamp::Timestamp,
};

/// Line dividing the JSON metadata from the Markdown body in an article file.
pub const SEPARATOR: &str = "---------- META END ----------";

/// An article with its rendered body
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    id: String,
    link: String,
    metadata: ArticleMetadata,
    body: String,
    comments: Vec<Comment>,
}

#[derive(Debug, thiserror::Error)]
pub enum FailToOpenArticle {
    #[error("Article not found")]
    NotFound,
    #[error("Invalid article id `{0}`")]
    InvalidId(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Article {
    /// Parse the raw content of an article file.
    ///
    /// Parsing never fails: a broken metadata header yields empty metadata and
    /// the body is rendered regardless.
    #[must_use]
    pub fn parse(id: impl Into<String>, source: &str) -> Self {
        let (header, body) = split_source(source);
        let metadata = ArticleMetadata::from_json_lossy(header);
        let body = markdown::render(body, RenderOptions::article(metadata.toc()));

        Self {
            id: id.into(),
            link: String::new(),
            metadata,
            body,
            comments: Vec::new(),
        }
    }

    /// Set the absolute link of the article from the site address.
    #[must_use]
    pub fn with_link(mut self, address: &str) -> Self {
        self.link = format!("{}/article/{}", address.trim_end_matches('/'), self.id);
        self
    }

    #[must_use]
    pub fn with_comments(mut self, comments: Vec<Comment>) -> Self {
        self.comments = comments;
        self
    }

    pub fn set_comments(&mut self, comments: Vec<Comment>) {
        self.comments = comments;
    }

    /// Identifier derived from the file name, without extension
    #[must_use]
    pub const fn id(&self) -> &str {
        self.id.as_str()
    }

    #[must_use]
    pub const fn link(&self) -> &str {
        self.link.as_str()
    }

    #[must_use]
    pub const fn metadata(&self) -> &ArticleMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn title(&self) -> &str {
        self.metadata.title()
    }

    #[must_use]
    pub const fn description(&self) -> &str {
        self.metadata.description()
    }

    #[must_use]
    pub const fn created(&self) -> Timestamp {
        self.metadata.created()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        self.metadata.tags()
    }

    /// Rendered HTML body
    #[must_use]
    pub const fn body(&self) -> &str {
        self.body.as_str()
    }

    #[must_use]
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }
}

/// Whether `id` can name an article: ASCII letters, digits and `_` only.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_')
}

/// Split an article file into its metadata header and Markdown body.
///
/// The separator only counts when it is preceded by something: a file that
/// starts with it is all body.
#[must_use]
pub fn split_source(source: &str) -> (&str, &str) {
    match source.find(SEPARATOR) {
        Some(offset) if offset > 0 => {
            let head = &source[..offset];
            // drop the newline before the separator
            let header = head
                .char_indices()
                .next_back()
                .map_or(head, |(last, _)| &head[..last]);
            (header, &source[offset + SEPARATOR.len()..])
        }
        _ => ("", source),
    }
}
