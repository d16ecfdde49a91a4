//! RSS 2.0 and Atom 1.0 feeds of the article listing.

use atom_syndication::{
    EntryBuilder, FeedBuilder, FixedDateTime, LinkBuilder, PersonBuilder, Text,
};
use rss::{ChannelBuilder, GuidBuilder, ItemBuilder};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use tracing::debug;

use crate::{article::Article, page::SiteContext, stamp::Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum FailToBuildFeed {
    #[error("Cannot format timestamp {0}: {1}")]
    Timestamp(Timestamp, String),
    #[error("RSS serialization failed: {0}")]
    Rss(#[from] rss::Error),
    #[error("Atom serialization failed: {0}")]
    Atom(#[from] atom_syndication::Error),
    #[error("Feed is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One article as it appears in a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub created: Timestamp,
}

/// Site-level feed data, independent of the output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author_name: String,
    pub author_email: String,
    pub created: Timestamp,
    pub entries: Vec<FeedEntry>,
}

impl Feed {
    /// Project the newest-first listing into a feed.
    #[must_use]
    pub fn from_articles(site: &SiteContext, articles: &[Article]) -> Self {
        Self::with_created(site, articles, Timestamp::now())
    }

    fn with_created(site: &SiteContext, articles: &[Article], created: Timestamp) -> Self {
        Self {
            title: site.title().to_string(),
            link: site.address().to_string(),
            description: site.description().to_string(),
            author_name: site.name().to_string(),
            author_email: site.email().to_string(),
            created,
            entries: articles
                .iter()
                .map(|article| FeedEntry {
                    title: article.title().to_string(),
                    link: article.link().to_string(),
                    description: article.description().to_string(),
                    created: article.created(),
                })
                .collect(),
        }
    }

    fn rss_author(&self) -> String {
        if self.author_email.is_empty() {
            self.author_name.clone()
        } else {
            format!("{} ({})", self.author_email, self.author_name)
        }
    }

    /// Serialize as an RSS 2.0 document.
    ///
    /// # Errors
    /// Fails if the document cannot be written.
    pub fn to_rss(&self) -> Result<String, FailToBuildFeed> {
        let author = self.rss_author();
        let items = self
            .entries
            .iter()
            .map(|entry| {
                ItemBuilder::default()
                    .title(entry.title.clone())
                    .link(entry.link.clone())
                    .description(entry.description.clone())
                    .author(author.clone())
                    .guid(
                        GuidBuilder::default()
                            .value(entry.link.clone())
                            .permalink(true)
                            .build(),
                    )
                    .pub_date(rfc2822(entry.created))
                    .build()
            })
            .collect::<Vec<_>>();

        let channel = ChannelBuilder::default()
            .title(self.title.clone())
            .link(self.link.clone())
            .description(self.description.clone())
            .managing_editor(author)
            .pub_date(rfc2822(self.created))
            .items(items)
            .build();

        Ok(String::from_utf8(channel.write_to(Vec::new())?)?)
    }

    /// Serialize as an Atom 1.0 document.
    ///
    /// # Errors
    /// Fails if a timestamp cannot be expressed or the document cannot be written.
    pub fn to_atom(&self) -> Result<String, FailToBuildFeed> {
        let author = PersonBuilder::default()
            .name(self.author_name.clone())
            .email((!self.author_email.is_empty()).then(|| self.author_email.clone()))
            .build();

        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let created = rfc3339(entry.created)?;
                Ok(EntryBuilder::default()
                    .title(entry.title.clone())
                    .id(entry.link.clone())
                    .updated(created)
                    .published(Some(created))
                    .authors(vec![author.clone()])
                    .links(vec![
                        LinkBuilder::default()
                            .href(entry.link.clone())
                            .rel("alternate")
                            .build(),
                    ])
                    .summary(Some(Text::plain(entry.description.clone())))
                    .build())
            })
            .collect::<Result<Vec<_>, FailToBuildFeed>>()?;

        let feed = FeedBuilder::default()
            .title(self.title.clone())
            .id(self.link.clone())
            .updated(rfc3339(self.created)?)
            .subtitle(Some(Text::plain(self.description.clone())))
            .authors(vec![author])
            .links(vec![
                LinkBuilder::default()
                    .href(self.link.clone())
                    .rel("alternate")
                    .build(),
            ])
            .entries(entries)
            .build();

        Ok(String::from_utf8(feed.write_to(Vec::new())?)?)
    }
}

// RFC 2822 cannot express years before 1900, such dates are left out.
fn rfc2822(timestamp: Timestamp) -> Option<String> {
    match timestamp.to_offset().format(&Rfc2822) {
        Ok(formatted) => Some(formatted),
        Err(err) => {
            debug!("Leaving out pubDate for {timestamp}: {err}");
            None
        }
    }
}

fn rfc3339(timestamp: Timestamp) -> Result<FixedDateTime, FailToBuildFeed> {
    let formatted = timestamp
        .to_offset()
        .format(&Rfc3339)
        .map_err(|err| FailToBuildFeed::Timestamp(timestamp, err.to_string()))?;
    FixedDateTime::parse_from_rfc3339(&formatted)
        .map_err(|err| FailToBuildFeed::Timestamp(timestamp, err.to_string()))
}
