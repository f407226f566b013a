use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::models::{Comment, Post, PostPatch, UserRef};

/// Ordered posts, newest first, with unique ids. Local edits patch the list
/// in place instead of refetching it.
pub struct FeedStore {
    posts: watch::Sender<Vec<Post>>,
}

impl Default for FeedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStore {
    pub fn new() -> Self {
        Self::with_posts(Vec::new())
    }

    pub fn with_posts(posts: Vec<Post>) -> Self {
        let (tx, _) = watch::channel(dedupe(posts));
        Self { posts: tx }
    }

    /// A feed holding the welcome post shown before the first fetch.
    pub fn seeded() -> Self {
        Self::with_posts(vec![demo_post()])
    }

    pub fn snapshot(&self) -> Vec<Post> {
        self.posts.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Post>> {
        self.posts.subscribe()
    }

    pub fn len(&self) -> usize {
        self.posts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.borrow().is_empty()
    }

    pub fn get(&self, post_id: &str) -> Option<Post> {
        self.posts.borrow().iter().find(|p| p.id == post_id).cloned()
    }

    /// Replaces the whole feed. Later duplicates of an id are dropped.
    pub fn replace_all(&self, posts: Vec<Post>) {
        let posts = dedupe(posts);
        debug!(count = posts.len(), "feed replaced");
        self.posts.send_replace(posts);
    }

    /// Puts `post` first regardless of its timestamp. An existing entry with
    /// the same id is removed so ids stay unique.
    pub fn prepend(&self, post: Post) {
        self.posts.send_modify(|posts| {
            posts.retain(|p| p.id != post.id);
            posts.insert(0, post);
        });
    }

    pub fn remove_by_id(&self, post_id: &str) -> Option<Post> {
        let mut removed = None;
        self.posts.send_if_modified(|posts| {
            let Some(index) = posts.iter().position(|p| p.id == post_id) else {
                return false;
            };
            removed = Some(posts.remove(index));
            true
        });
        removed
    }

    /// Merges `patch` into the post with `post_id`, keeping its position.
    /// Returns false when no such post is in the feed.
    pub fn replace_by_id(&self, post_id: &str, patch: PostPatch) -> bool {
        self.posts.send_if_modified(|posts| {
            match posts.iter_mut().find(|p| p.id == post_id) {
                Some(post) => {
                    post.merge(patch);
                    true
                }
                None => false,
            }
        })
    }

    pub fn set_comment_count(&self, post_id: &str, count: usize) {
        self.posts.send_if_modified(|posts| {
            match posts.iter_mut().find(|p| p.id == post_id) {
                Some(post) if post.comment_count != Some(count) => {
                    post.comment_count = Some(count);
                    true
                }
                _ => false,
            }
        });
    }
}

fn dedupe(posts: Vec<Post>) -> Vec<Post> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|post| seen.insert(post.id.clone()))
        .collect()
}

fn demo_post() -> Post {
    Post {
        id: "1".into(),
        author: UserRef {
            id: "2".into(),
            name: "Prof. Smith".into(),
            avatar: Some("/images/avatar-placeholder.svg".into()),
        },
        content: "CS101 syllabus is out!".into(),
        media: None,
        likes: Default::default(),
        created_at: Utc::now() - Duration::days(1),
        updated_at: None,
        comment_count: None,
    }
}

/// Last fetched comment list per post.
#[derive(Default)]
pub struct CommentStore {
    by_post: RwLock<HashMap<String, Vec<Comment>>>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comments(&self, post_id: &str) -> Vec<Comment> {
        self.read().get(post_id).cloned().unwrap_or_default()
    }

    pub fn find(&self, post_id: &str, comment_id: &str) -> Option<Comment> {
        self.read()
            .get(post_id)
            .and_then(|list| list.iter().find(|c| c.id == comment_id).cloned())
    }

    pub fn replace(&self, post_id: &str, comments: Vec<Comment>) {
        self.by_post
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(post_id.to_string(), comments);
    }

    pub fn forget(&self, post_id: &str) {
        self.by_post
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(post_id);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Comment>>> {
        self.by_post.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
