use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A signed-in account. `id` is the canonical identity field regardless of
/// which id key the server used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
}

impl User {
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// The author stub embedded in posts and comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserRef {
    pub const UNKNOWN_NAME: &'static str = "Unknown User";

    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Self::UNKNOWN_NAME.to_string(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            m if m.starts_with("image/") => Some(MediaKind::Image),
            m if m.starts_with("video/") => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(other.to_string()),
        }
    }
}

/// The single attachment a post may carry. `url` is relative to the static
/// asset base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: UserRef,
    pub content: String,
    #[serde(default)]
    pub media: Option<Media>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Local-only: last comment count observed for this post.
    #[serde(default)]
    pub comment_count: Option<usize>,
}

impl Post {
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        !self.author.id.is_empty() && self.author.id == user_id
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.contains(user_id)
    }

    /// Applies server-authoritative fields over the local copy.
    ///
    /// Precedence: every field present in `patch` (author, content, media,
    /// likes, updated_at) replaces the local value; absent fields keep the
    /// local value. `id`, `created_at` and the local-only `comment_count`
    /// are never touched.
    pub fn merge(&mut self, patch: PostPatch) {
        if let Some(author) = patch.author {
            self.author = author;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(media) = patch.media {
            self.media = media;
        }
        if let Some(likes) = patch.likes {
            self.likes = likes;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = Some(updated_at);
        }
    }
}

/// Fields a server response carried for an existing post. `None` means the
/// field was absent from the payload, not that it was cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPatch {
    pub id: String,
    pub author: Option<UserRef>,
    pub content: Option<String>,
    pub media: Option<Option<Media>>,
    pub likes: Option<BTreeSet<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PostPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_likes<I, S>(mut self, likes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.likes = Some(likes.into_iter().map(Into::into).collect());
        self
    }
}

impl From<Post> for PostPatch {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            author: Some(post.author),
            content: Some(post.content),
            media: Some(post.media),
            likes: Some(post.likes),
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: UserRef,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        !self.author.id.is_empty() && self.author.id == user_id
    }
}

/// A binary file headed for a multipart upload.
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads a file from disk, sniffing its MIME type from the content.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read upload {}", path.display()))?;
        let mime = infer::get(&bytes)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            file_name,
            mime,
            bytes,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub id_number: Option<String>,
    pub additional_info: Option<String>,
    pub avatar: Option<FileUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostAttachment {
    pub kind: MediaKind,
    pub file: FileUpload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub content: String,
    pub media: Option<PostAttachment>,
}

impl NewPost {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub message: Option<String>,
    pub token: String,
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignupResponse {
    pub message: Option<String>,
    pub user: Option<User>,
}

/// What a comment mutation answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentReply {
    One(Comment),
    Many(Vec<Comment>),
    Ack,
}
