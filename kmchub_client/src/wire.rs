//! Raw backend payload shapes and the functions that normalize them.
//!
//! The backend is inconsistent about identity keys (`id` vs `_id`), about the
//! casing of the user key in auth responses (`user` vs `User`) and about
//! whether single records come wrapped (`{"post": {...}}`) or bare. Every
//! deserialization point in the crate goes through this module so the rest of
//! the code only ever sees canonical [`crate::models`] types.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{
    Comment, CommentReply, LoginResponse, Media, MediaKind, Post, PostPatch, Role,
    SignupResponse, User, UserRef,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "_id")]
    pub legacy_id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
}

/// Author field of posts and comments: populated object or a bare id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireAuthor {
    Populated {
        #[serde(default)]
        id: Option<Value>,
        #[serde(default, rename = "_id")]
        legacy_id: Option<Value>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
    Id(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMedia {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePost {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "_id")]
    pub legacy_id: Option<Value>,
    #[serde(default, alias = "author")]
    pub user_id: Option<WireAuthor>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Option<Vec<WireMedia>>,
    #[serde(default)]
    pub likes: Option<Vec<Value>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireComment {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "_id")]
    pub legacy_id: Option<Value>,
    #[serde(default)]
    pub post_id: Option<Value>,
    #[serde(default, alias = "author")]
    pub user_id: Option<WireAuthor>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WireLoginResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub token: String,
    #[serde(default, alias = "User")]
    pub user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
pub struct WireSignupResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "User")]
    pub user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UserEnvelope {
    Wrapped {
        #[serde(alias = "User")]
        user: WireUser,
    },
    Bare(WireUser),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PostEnvelope {
    Wrapped { post: WirePost },
    Bare(WirePost),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PostsEnvelope {
    Wrapped { posts: Vec<Value> },
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CommentsEnvelope {
    Wrapped { comments: Vec<Value> },
    Bare(Vec<Value>),
}

/// Ids arrive as strings, occasionally as numbers, and for populated
/// relations sometimes as `{"_id": ...}` objects.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("_id"))
            .and_then(id_string),
        _ => None,
    }
}

/// `id` wins over `_id` when both are present.
fn canonical_id(id: Option<&Value>, legacy_id: Option<&Value>) -> Option<String> {
    id.and_then(id_string)
        .or_else(|| legacy_id.and_then(id_string))
}

pub fn normalize_user(wire: WireUser) -> Option<User> {
    let id = canonical_id(wire.id.as_ref(), wire.legacy_id.as_ref())?;
    let role = match wire.role.as_deref().map(str::parse::<Role>) {
        Some(Ok(role)) => role,
        Some(Err(raw)) => {
            warn!(user_id = %id, role = %raw, "discarding user with unknown role");
            return None;
        }
        None => {
            warn!(user_id = %id, "discarding user without role");
            return None;
        }
    };
    Some(User {
        id,
        name: wire.name.unwrap_or_default(),
        email: wire.email.unwrap_or_default(),
        role,
        avatar: wire.avatar.filter(|a| !a.is_empty()),
        id_number: wire.id_number.filter(|n| !n.is_empty()),
    })
}

/// Parses a user previously written to durable storage. Anything malformed
/// reads as no user.
pub fn parse_stored_user(raw: &str) -> Option<User> {
    match serde_json::from_str::<Option<WireUser>>(raw) {
        Ok(wire) => wire.and_then(normalize_user),
        Err(err) => {
            warn!(error = %err, "stored user is not valid JSON");
            None
        }
    }
}

pub fn normalize_author(wire: Option<WireAuthor>) -> UserRef {
    match wire {
        Some(WireAuthor::Populated {
            id,
            legacy_id,
            name,
            avatar,
        }) => {
            let id = canonical_id(id.as_ref(), legacy_id.as_ref()).unwrap_or_default();
            UserRef {
                id,
                name: name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| UserRef::UNKNOWN_NAME.to_string()),
                avatar: avatar.filter(|a| !a.is_empty()),
            }
        }
        Some(WireAuthor::Id(value)) => UserRef::unknown(id_string(&value).unwrap_or_default()),
        None => UserRef::unknown(""),
    }
}

/// Collapses the media list to the single attachment slot. Placeholder
/// entries with an empty url or unknown type count as no media.
fn normalize_media(media: Vec<WireMedia>) -> Option<Media> {
    let first = media.into_iter().next()?;
    if first.url.trim().is_empty() {
        return None;
    }
    let kind = first.kind.parse::<MediaKind>().ok()?;
    Some(Media {
        url: first.url,
        kind,
    })
}

fn normalize_likes(likes: Vec<Value>) -> std::collections::BTreeSet<String> {
    likes.iter().filter_map(id_string).collect()
}

pub fn normalize_post(wire: WirePost) -> Option<Post> {
    let Some(id) = canonical_id(wire.id.as_ref(), wire.legacy_id.as_ref()) else {
        warn!("discarding post without id");
        return None;
    };
    let Some(created_at) = wire.created_at else {
        warn!(post_id = %id, "discarding post without createdAt");
        return None;
    };
    Some(Post {
        author: normalize_author(wire.user_id),
        content: wire.content.unwrap_or_default(),
        media: wire.media.and_then(normalize_media),
        likes: wire.likes.map(normalize_likes).unwrap_or_default(),
        created_at,
        updated_at: wire.updated_at,
        comment_count: None,
        id,
    })
}

/// Records are decoded one at a time so a single malformed post costs only
/// itself, not the whole list.
pub fn normalize_posts(records: Vec<Value>) -> Vec<Post> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<WirePost>(record) {
            Ok(wire) => normalize_post(wire),
            Err(err) => {
                warn!(error = %err, "discarding undecodable post");
                None
            }
        })
        .collect()
}

/// Keeps only what the payload actually carried; see [`Post::merge`].
pub fn post_patch(wire: WirePost) -> Option<PostPatch> {
    let id = canonical_id(wire.id.as_ref(), wire.legacy_id.as_ref())?;
    Some(PostPatch {
        id,
        author: wire.user_id.map(|author| normalize_author(Some(author))),
        content: wire.content,
        media: wire.media.map(normalize_media),
        likes: wire.likes.map(normalize_likes),
        updated_at: wire.updated_at,
    })
}

pub fn normalize_comment(wire: WireComment, post_id: &str) -> Option<Comment> {
    let id = canonical_id(wire.id.as_ref(), wire.legacy_id.as_ref())?;
    let text = wire.text?;
    Some(Comment {
        post_id: wire
            .post_id
            .as_ref()
            .and_then(id_string)
            .unwrap_or_else(|| post_id.to_string()),
        author: normalize_author(wire.user_id),
        text,
        created_at: wire.created_at.unwrap_or_else(Utc::now),
        id,
    })
}

pub fn normalize_comments(records: Vec<Value>, post_id: &str) -> Vec<Comment> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<WireComment>(record) {
            Ok(wire) => normalize_comment(wire, post_id),
            Err(err) => {
                warn!(post_id, error = %err, "discarding undecodable comment");
                None
            }
        })
        .collect()
}

/// Comment mutations answer with a comment, a wrapped comment, the whole list
/// or just an acknowledgement, depending on the route.
pub fn comment_reply(body: Value, post_id: &str) -> CommentReply {
    if let Ok(CommentsEnvelope::Wrapped { comments } | CommentsEnvelope::Bare(comments)) =
        serde_json::from_value::<CommentsEnvelope>(body.clone())
    {
        return CommentReply::Many(normalize_comments(comments, post_id));
    }
    let single = body.get("comment").cloned().unwrap_or(body);
    serde_json::from_value::<WireComment>(single)
        .ok()
        .and_then(|wire| normalize_comment(wire, post_id))
        .map(CommentReply::One)
        .unwrap_or(CommentReply::Ack)
}

pub fn login_response(wire: WireLoginResponse) -> LoginResponse {
    LoginResponse {
        message: wire.message,
        token: wire.token,
        user: wire.user.and_then(normalize_user),
    }
}

pub fn signup_response(wire: WireSignupResponse) -> SignupResponse {
    SignupResponse {
        message: wire.message,
        user: wire.user.and_then(normalize_user),
    }
}

pub fn unwrap_user(envelope: UserEnvelope) -> WireUser {
    match envelope {
        UserEnvelope::Wrapped { user } | UserEnvelope::Bare(user) => user,
    }
}

pub fn unwrap_post(envelope: PostEnvelope) -> WirePost {
    match envelope {
        PostEnvelope::Wrapped { post } | PostEnvelope::Bare(post) => post,
    }
}

pub fn unwrap_posts(envelope: PostsEnvelope) -> Vec<Value> {
    match envelope {
        PostsEnvelope::Wrapped { posts } | PostsEnvelope::Bare(posts) => posts,
    }
}

pub fn unwrap_comments(envelope: CommentsEnvelope) -> Vec<Value> {
    match envelope {
        CommentsEnvelope::Wrapped { comments } | CommentsEnvelope::Bare(comments) => comments,
    }
}
