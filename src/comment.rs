//! Reader comments.
//!
//! Every article has at most one comment file, `<comments dir>/<id>.txt`:
//! ```plain
//! {
//!     "Comments": [
//!         {
//!             "Name": "Reader",
//!             "CommentBody": "Nice post",
//!             "TimeStamp": "2014-03-09 17:42"
//!         }
//!     ]
//! }
//! ```
//! Comments are only ever appended.

use std::{
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use tempfile::NamedTempFile;
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};

use crate::{article::is_valid_id, captcha::CaptchaVerifier, stamp::Timestamp};

const COMMENT_EXTENSION: &str = "txt";

/// A single reader comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CommentBody")]
    body: String,
    #[serde(rename = "TimeStamp")]
    timestamp: Timestamp,
}

impl Comment {
    pub fn new(name: impl Into<String>, body: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            timestamp,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub const fn body(&self) -> &str {
        self.body.as_str()
    }

    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CommentFile {
    // older files may hold `null` here
    #[serde(rename = "Comments", default)]
    comments: Option<Vec<Comment>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FailToReadComments {
    #[error("Invalid article id `{0}`")]
    InvalidId(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed comment file for `{id}`: {source}")]
    Malformed {
        id: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FailToAppendComment {
    #[error("Cannot read existing comments: {0}")]
    Read(#[from] FailToReadComments),
    #[error("Cannot serialize comments: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File-backed comment collections, one file per article.
///
/// Clones share the same write lock. All appends in the process are
/// serialized through that single lock, whichever article they target.
#[derive(Debug, Clone)]
pub struct CommentStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CommentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &str) -> Result<PathBuf, FailToReadComments> {
        if !is_valid_id(id) {
            return Err(FailToReadComments::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{COMMENT_EXTENSION}")))
    }

    /// Read the comments of an article.
    ///
    /// A missing file is an empty collection, not an error.
    ///
    /// # Errors
    /// Returns [`FailToReadComments::Malformed`] if the file is not valid JSON,
    /// or an I/O error if it cannot be read.
    pub async fn comments(&self, id: &str) -> Result<Vec<Comment>, FailToReadComments> {
        let path = self.path_of(id)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let file: CommentFile =
            serde_json::from_slice(&content).map_err(|source| FailToReadComments::Malformed {
                id: id.to_string(),
                source,
            })?;
        Ok(file.comments.unwrap_or_default())
    }

    /// Read the comments of an article, degrading to an empty collection on failure.
    pub async fn comments_or_empty(&self, id: &str) -> Vec<Comment> {
        self.comments(id).await.unwrap_or_else(|err| {
            warn!("Failed to read comments, showing none: {err}");
            Vec::new()
        })
    }

    /// Append a comment to an article's collection.
    ///
    /// The whole read-modify-write happens under the store lock. The new
    /// collection is written to a fresh temporary file in the same directory,
    /// synced, then persisted over the old one.
    ///
    /// # Errors
    /// Fails if the existing file cannot be read or is malformed (it is left
    /// untouched), or if writing the new file fails.
    pub async fn append(&self, id: &str, comment: Comment) -> Result<(), FailToAppendComment> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_of(id)?;
        let mut comments = self.comments(id).await?;
        let created = comments.is_empty() && fs::metadata(&path).await.is_err();
        comments.push(comment);

        let content = to_pretty_json(&CommentFile {
            comments: Some(comments),
        })?;

        fs::create_dir_all(&self.dir).await?;
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &content))
            .await
            .map_err(io::Error::other)??;

        if created {
            info!("Created comment file for article `{id}`");
        }
        Ok(())
    }
}

fn write_atomically(dir: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn to_pretty_json(file: &CommentFile) -> Result<Vec<u8>, serde_json::Error> {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    file.serialize(&mut serializer)?;
    Ok(buffer)
}

/// Fields of the comment form on an article page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub recaptcha_challenge_field: Option<String>,
    #[serde(default)]
    pub recaptcha_response_field: Option<String>,
}

impl CommentForm {
    /// A form with both name and body empty is not an attempt to comment.
    #[must_use]
    pub fn is_attempt(&self) -> bool {
        !self.user.is_empty() || !self.comment.is_empty()
    }
}

/// What happened to a comment form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitOutcome {
    NotAttempted,
    CaptchaRejected,
    Added,
    Failed,
}

/// Result of processing a comment form, echoed back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub outcome: SubmitOutcome,
    /// Name to pre-fill in the form, cleared once the comment is stored.
    pub name: String,
    /// Body to pre-fill in the form, cleared once the comment is stored.
    pub body: String,
}

impl Submission {
    #[must_use]
    pub const fn not_attempted() -> Self {
        Self {
            outcome: SubmitOutcome::NotAttempted,
            name: String::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn is_added(&self) -> bool {
        self.outcome == SubmitOutcome::Added
    }

    #[must_use]
    pub fn is_captcha_rejected(&self) -> bool {
        self.outcome == SubmitOutcome::CaptchaRejected
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.outcome == SubmitOutcome::Failed
    }
}

/// Verify the captcha of a comment form and store the comment if it passes.
pub async fn submit(
    store: &CommentStore,
    captcha: &dyn CaptchaVerifier,
    id: &str,
    form: CommentForm,
    remote_ip: &str,
) -> Submission {
    if !form.is_attempt() {
        return Submission::not_attempted();
    }

    let rejected = |form: CommentForm| Submission {
        outcome: SubmitOutcome::CaptchaRejected,
        name: form.user,
        body: form.comment,
    };

    let (Some(challenge), Some(response)) = (
        form.recaptcha_challenge_field.clone(),
        form.recaptcha_response_field.clone(),
    ) else {
        warn!("Tried to comment without filling in every captcha field");
        return rejected(form);
    };

    let passed = match captcha.verify(&challenge, &response, remote_ip).await {
        Ok(passed) => passed,
        Err(err) => {
            warn!("Captcha verification failed: {err}");
            false
        }
    };
    if !passed {
        info!("Tried to comment but the captcha was not solved");
        return rejected(form);
    }

    let comment = Comment::new(form.user.clone(), form.comment.clone(), Timestamp::now());
    match store.append(id, comment).await {
        Ok(()) => {
            info!("Added comment to article `{id}`");
            Submission {
                outcome: SubmitOutcome::Added,
                name: String::new(),
                body: String::new(),
            }
        }
        Err(err) => {
            warn!("Failed to add comment to article `{id}`: {err}");
            Submission {
                outcome: SubmitOutcome::Failed,
                name: form.user,
                body: form.comment,
            }
        }
    }
}
