//! Article metadata
//!
//! Every article file may start with a JSON object describing the article:
//! ```plain
//! {
//!     "Title": "Fast corner detection",
//!     "LongTitle": "Fast corner detection on embedded hardware",
//!     "Description": "Notes from porting FAST to a microcontroller",
//!     "DateCreated": "2014-03-09 17:42",
//!     "DateModified": "2014-03-12 09:00",
//!     "Icon": "/content_static/articles/fast/icon.png",
//!     "Tags": ["image processing", "embedded"],
//!     "CreateToc": true
//! }
//! ---------- META END ----------
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::stamp::Timestamp;

/// Metadata of an article, read from the JSON header of its file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArticleMetadata {
    title: String,
    long_title: String,
    description: String,
    created: Timestamp,
    modified: Timestamp,
    icon: String,
    tags: Vec<String>,
    toc: bool,
}

// Dates stay as strings here so that a bad date does not reject the whole header.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawMetadata {
    title: String,
    long_title: String,
    description: String,
    date_created: Option<String>,
    date_modified: Option<String>,
    icon: String,
    tags: Vec<String>,
    create_toc: bool,
}

impl ArticleMetadata {
    /// Decode the JSON header strictly.
    ///
    /// Unparseable dates are not an error: a bad creation date becomes
    /// [`Timestamp::ZERO`] and a missing or bad modification date falls back
    /// to the creation date.
    ///
    /// # Errors
    /// Returns the JSON error if the header is not a valid metadata object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMetadata = serde_json::from_str(json)?;
        Ok(raw.into())
    }

    /// Decode the JSON header, falling back to empty metadata on failure.
    #[must_use]
    pub fn from_json_lossy(json: &str) -> Self {
        if json.trim().is_empty() {
            debug!("Article has no metadata header");
            return Self::default();
        }
        Self::from_json(json).unwrap_or_else(|err| {
            warn!("Failed to parse article metadata, using empty metadata: {err}");
            Self::default()
        })
    }

    /// Get the short title of the article
    #[must_use]
    pub const fn title(&self) -> &str {
        self.title.as_str()
    }

    /// Get the long title, or the short one if no long title is set
    #[must_use]
    pub fn long_title(&self) -> &str {
        if self.long_title.is_empty() {
            &self.title
        } else {
            &self.long_title
        }
    }

    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }

    #[must_use]
    pub const fn created(&self) -> Timestamp {
        self.created
    }

    #[must_use]
    pub const fn modified(&self) -> Timestamp {
        self.modified
    }

    #[must_use]
    pub const fn icon(&self) -> &str {
        self.icon.as_str()
    }

    /// Get the tags of the article, in the order they were written
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the tags contain `tag` exactly (case-sensitive)
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    /// Whether a table of contents was requested for this article
    #[must_use]
    pub const fn toc(&self) -> bool {
        self.toc
    }
}

impl From<RawMetadata> for ArticleMetadata {
    fn from(raw: RawMetadata) -> Self {
        let created = match raw.date_created.as_deref() {
            Some(value) => Timestamp::parse(value).unwrap_or_else(|err| {
                warn!("{err}, using zero creation time");
                Timestamp::ZERO
            }),
            None => Timestamp::ZERO,
        };
        let modified = raw
            .date_modified
            .as_deref()
            .and_then(|value| {
                Timestamp::parse(value)
                    .inspect_err(|err| debug!("{err}, using creation time as modification time"))
                    .ok()
            })
            .unwrap_or(created);

        Self {
            title: raw.title,
            long_title: raw.long_title,
            description: raw.description,
            created,
            modified,
            icon: raw.icon,
            tags: raw.tags,
            toc: raw.create_toc,
        }
    }
}
