//! Tag listings.

use crate::article::Article;

/// Whether `tag` can appear in a tag URL: ASCII letters, digits, `_` and spaces.
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | ' '))
}

/// Keep the articles carrying `tag` (exact, case-sensitive), preserving order.
#[must_use]
pub fn filter_by_tag(articles: Vec<Article>, tag: &str) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|article| article.metadata().has_tag(tag))
        .collect()
}

/// A listing split into two display columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns<T> {
    pub left: Vec<T>,
    pub right: Vec<T>,
}

impl<T> Columns<T> {
    /// Items at even positions go left, odd positions go right.
    #[must_use]
    pub fn split(items: impl IntoIterator<Item = T>) -> Self {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if index % 2 == 0 {
                left.push(item);
            } else {
                right.push(item);
            }
        }
        Self { left, right }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}
