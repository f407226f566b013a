//! User-facing flows. Each method checks the session, calls the backend and
//! applies the result to the stores; renderers only read the stores and the
//! returned errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::DropGuard;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::HubConfig;
use crate::error::{ApiError, HubError};
use crate::feed::{CommentStore, FeedStore};
use crate::forms::{
    CommentValues, Form, LoginValues, PostValues, SignupValues, AFTER_LOGIN, AFTER_SIGNUP,
};
use crate::models::{
    Comment, CommentReply, LoginInput, NewPost, Post, SignupInput, SignupResponse, User,
};
use crate::session::{CommitOutcome, Session, SessionCommand, SessionStore};
use crate::storage::{DurableStorage, FileStorage};

#[derive(Clone)]
pub struct Hub {
    api: ApiClient,
    session: Arc<SessionStore>,
    feed: Arc<FeedStore>,
    comments: Arc<CommentStore>,
}

impl Hub {
    pub fn new(api: ApiClient, storage: Arc<dyn DurableStorage>) -> Self {
        let session = SessionStore::load(storage, Arc::new(api.clone()));
        Self {
            api,
            session: Arc::new(session),
            feed: Arc::new(FeedStore::new()),
            comments: Arc::new(CommentStore::new()),
        }
    }

    /// Builds a hub backed by file storage in the configured state directory.
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        let api = ApiClient::from_config(config)?;
        let storage = FileStorage::open(&config.state_dir)
            .with_context(|| format!("failed to open state in {}", config.state_dir.display()))?;
        Ok(Self::new(api, Arc::new(storage)))
    }

    pub fn with_feed(mut self, feed: FeedStore) -> Self {
        self.feed = Arc::new(feed);
        self
    }

    /// A hub sharing this one's stores whose requests are cancelled when the
    /// guard drops. Cancelled requests leave every store untouched.
    pub fn scoped(&self) -> (Hub, DropGuard) {
        let (api, guard) = self.api.scoped();
        let hub = Self {
            api,
            session: self.session.clone(),
            feed: self.feed.clone(),
            comments: self.comments.clone(),
        };
        (hub, guard)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn feed(&self) -> &FeedStore {
        &self.feed
    }

    pub fn comments(&self) -> &CommentStore {
        &self.comments
    }

    /// Completes a session restored from storage with only a token.
    pub async fn restore(&self) -> CommitOutcome {
        self.session.restore().await
    }

    /// Signs in and replaces the session. On failure the session is left
    /// exactly as it was.
    pub async fn login(&self, input: &LoginInput) -> Result<Session, HubError> {
        let response = self.api.login(input).await?;
        if response.token.is_empty() {
            return Err(HubError::Invalid("Login failed".into()));
        }
        let outcome = self
            .session
            .commit(SessionCommand::Replace {
                user: response.user,
                token: Some(response.token),
            })
            .await;
        match outcome {
            CommitOutcome::Applied(session) | CommitOutcome::Refreshed(session) => {
                info!(user_id = session.user_id().unwrap_or_default(), "logged in");
                Ok(session)
            }
            CommitOutcome::Expired(err) => Err(HubError::Api(err)),
            CommitOutcome::Superseded | CommitOutcome::LoggedOut => Ok(self.session.snapshot()),
        }
    }

    /// Registers an account. The session is not touched; the new user signs
    /// in afterwards.
    pub async fn signup(&self, input: &SignupInput) -> Result<SignupResponse, HubError> {
        let response = self.api.signup(input).await?;
        info!(role = input.role.as_str(), "account registered");
        Ok(response)
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub async fn load_feed(&self) -> Result<usize, HubError> {
        let token = self.require_token("view posts")?;
        let posts = self.authorized(Some(token.as_str()), self.api.list_posts(&token).await)?;
        let count = posts.len();
        self.feed.replace_all(posts);
        Ok(count)
    }

    pub async fn create_post(&self, input: &NewPost) -> Result<Post, HubError> {
        let token = self.require_token("create a post")?;
        if input.content.trim().is_empty() {
            return Err(HubError::Invalid("Content cannot be empty".into()));
        }
        let post = self.authorized(
            Some(token.as_str()),
            self.api.create_post(&token, input).await,
        )?;
        self.feed.prepend(post.clone());
        debug!(post_id = %post.id, "post created");
        Ok(post)
    }

    pub async fn edit_post(&self, post_id: &str, content: &str) -> Result<Post, HubError> {
        let (user, token) = self.require_user("edit posts")?;
        self.authored_post(post_id, &user, "edit this post")?;
        if content.trim().is_empty() {
            return Err(HubError::Invalid("Content cannot be empty".into()));
        }
        let patch = self.authorized(
            Some(token.as_str()),
            self.api.edit_post(&token, post_id, content).await,
        )?;
        self.feed.replace_by_id(post_id, patch);
        self.post(post_id)
    }

    /// Once the server confirms, the deletion succeeds even if the feed was
    /// reloaded meanwhile. The removed post is returned when it was still
    /// cached.
    pub async fn delete_post(&self, post_id: &str) -> Result<Option<Post>, HubError> {
        let (user, token) = self.require_user("delete posts")?;
        self.authored_post(post_id, &user, "delete this post")?;
        let message = self.authorized(
            Some(token.as_str()),
            self.api.delete_post(&token, post_id).await,
        )?;
        debug!(post_id, message = message.as_deref().unwrap_or(""), "post deleted");
        self.comments.forget(post_id);
        Ok(self.feed.remove_by_id(post_id))
    }

    /// Likes the post if the current user has not, otherwise unlikes it.
    pub async fn toggle_like(&self, post_id: &str) -> Result<Post, HubError> {
        let (user, token) = self.require_user("like posts")?;
        let post = self.post(post_id)?;
        let result = if post.is_liked_by(&user.id) {
            self.api.unlike_post(&token, post_id).await
        } else {
            self.api.like_post(&token, post_id).await
        };
        let patch = self.authorized(Some(token.as_str()), result)?;
        self.feed.replace_by_id(post_id, patch);
        self.post(post_id)
    }

    /// Comments are public; the token is sent when there is one.
    pub async fn load_comments(&self, post_id: &str) -> Result<Vec<Comment>, HubError> {
        let token = self.session.snapshot().token().map(str::to_string);
        let comments = self.authorized(
            token.as_deref(),
            self.api.list_comments(post_id, token.as_deref()).await,
        )?;
        self.store_comments(post_id, comments.clone());
        Ok(comments)
    }

    pub async fn add_comment(&self, post_id: &str, text: &str) -> Result<Vec<Comment>, HubError> {
        let token = self.require_token("comment")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HubError::Invalid("Please enter a comment".into()));
        }
        let reply = self.authorized(
            Some(token.as_str()),
            self.api.add_comment(&token, post_id, text).await,
        )?;
        self.refetch_comments(post_id, &token, reply).await
    }

    pub async fn update_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<Vec<Comment>, HubError> {
        let (user, token) = self.require_user("edit comments")?;
        self.check_comment_author(post_id, comment_id, &user, "edit this comment")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HubError::Invalid("Please enter a comment".into()));
        }
        let reply = self.authorized(
            Some(token.as_str()),
            self.api
                .update_comment(&token, post_id, comment_id, text)
                .await,
        )?;
        self.refetch_comments(post_id, &token, reply).await
    }

    pub async fn delete_comment(
        &self,
        post_id: &str,
        comment_id: &str,
    ) -> Result<Vec<Comment>, HubError> {
        let (user, token) = self.require_user("delete comments")?;
        self.check_comment_author(post_id, comment_id, &user, "delete this comment")?;
        let reply = match self.authorized(
            Some(token.as_str()),
            self.api.delete_comment(&token, post_id, comment_id).await,
        )? {
            CommentReply::Many(list) => CommentReply::Many(list),
            CommentReply::One(_) | CommentReply::Ack => CommentReply::Many(
                self.comments
                    .comments(post_id)
                    .into_iter()
                    .filter(|c| c.id != comment_id)
                    .collect(),
            ),
        };
        self.refetch_comments(post_id, &token, reply).await
    }

    /// Drives the login form. Returns true once the session is signed in.
    pub async fn submit_login(&self, form: &mut Form<LoginValues>) -> bool {
        let Some(input) = form.begin_submit() else {
            return false;
        };
        match self.login(&input).await {
            Ok(_) => {
                form.succeed(Some(AFTER_LOGIN));
                true
            }
            Err(err) => {
                form.fail(err.display_message());
                false
            }
        }
    }

    pub async fn submit_signup(&self, form: &mut Form<SignupValues>) -> bool {
        let Some(input) = form.begin_submit() else {
            return false;
        };
        match self.signup(&input).await {
            Ok(_) => {
                form.succeed(Some(AFTER_SIGNUP));
                true
            }
            Err(err) => {
                form.fail(err.display_message());
                false
            }
        }
    }

    /// On success the form is cleared and shows its success state until
    /// [`Form::settle`] returns it to idle.
    pub async fn submit_post(&self, form: &mut Form<PostValues>) -> Option<Post> {
        let input = form.begin_submit()?;
        match self.create_post(&input).await {
            Ok(post) => {
                form.reset();
                form.succeed(None);
                Some(post)
            }
            Err(err) => {
                form.fail(err.display_message());
                None
            }
        }
    }

    pub async fn submit_comment(&self, post_id: &str, form: &mut Form<CommentValues>) -> bool {
        let Some(text) = form.begin_submit() else {
            return false;
        };
        match self.add_comment(post_id, &text).await {
            Ok(_) => {
                form.reset();
                true
            }
            Err(err) => {
                form.fail(err.display_message());
                false
            }
        }
    }

    fn require_token(&self, action: &'static str) -> Result<String, HubError> {
        self.session
            .snapshot()
            .token()
            .map(str::to_string)
            .ok_or(HubError::NotSignedIn { action })
    }

    fn require_user(&self, action: &'static str) -> Result<(User, String), HubError> {
        let session = self.session.snapshot();
        match (session.user(), session.token()) {
            (Some(user), Some(token)) => Ok((user.clone(), token.to_string())),
            _ => Err(HubError::NotSignedIn { action }),
        }
    }

    /// A 401 ends the session, but only if `token` is still the current one.
    /// A rejection that arrives after a re-login leaves the new session alone.
    fn authorized<T>(
        &self,
        token: Option<&str>,
        result: Result<T, ApiError>,
    ) -> Result<T, HubError> {
        result.map_err(|err| self.classify(token, err))
    }

    fn classify(&self, token: Option<&str>, err: ApiError) -> HubError {
        if !err.is_session_expired() {
            return HubError::Api(err);
        }
        match token {
            Some(token) if self.session.expire(token) => {
                warn!(error = %err, "token rejected; signed out");
                HubError::SessionExpired
            }
            _ => HubError::Api(err),
        }
    }

    fn post(&self, post_id: &str) -> Result<Post, HubError> {
        self.feed.get(post_id).ok_or_else(post_not_found)
    }

    fn authored_post(&self, post_id: &str, user: &User, action: &'static str) -> Result<Post, HubError> {
        let post = self.post(post_id)?;
        if !post.is_authored_by(&user.id) {
            return Err(HubError::NotAuthor { action });
        }
        Ok(post)
    }

    /// Only checked against the cached list; an uncached comment is left for
    /// the server to judge.
    fn check_comment_author(
        &self,
        post_id: &str,
        comment_id: &str,
        user: &User,
        action: &'static str,
    ) -> Result<(), HubError> {
        match self.comments.find(post_id, comment_id) {
            Some(comment) if !comment.is_authored_by(&user.id) => {
                Err(HubError::NotAuthor { action })
            }
            _ => Ok(()),
        }
    }

    /// The server list is authoritative after a mutation. If the refetch
    /// fails for a reason other than an expired session, the mutation's own
    /// reply is applied to the cached list instead.
    async fn refetch_comments(
        &self,
        post_id: &str,
        token: &str,
        reply: CommentReply,
    ) -> Result<Vec<Comment>, HubError> {
        match self.api.list_comments(post_id, Some(token)).await {
            Ok(comments) => {
                self.store_comments(post_id, comments.clone());
                Ok(comments)
            }
            Err(err) if err.is_session_expired() || err.is_cancelled() => {
                Err(self.classify(Some(token), err))
            }
            Err(err) => {
                warn!(post_id, error = %err, "comment refetch failed; using mutation reply");
                let mut comments = self.comments.comments(post_id);
                match reply {
                    CommentReply::Many(list) => comments = list,
                    CommentReply::One(comment) => {
                        match comments.iter_mut().find(|c| c.id == comment.id) {
                            Some(existing) => *existing = comment,
                            None => comments.push(comment),
                        }
                    }
                    CommentReply::Ack => {}
                }
                self.store_comments(post_id, comments.clone());
                Ok(comments)
            }
        }
    }

    fn store_comments(&self, post_id: &str, comments: Vec<Comment>) {
        self.feed.set_comment_count(post_id, comments.len());
        self.comments.replace(post_id, comments);
    }
}

fn post_not_found() -> HubError {
    HubError::NotFound("Post not found".into())
}
