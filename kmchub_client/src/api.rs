use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::config::{sanitize_base_url, HubConfig};
use crate::error::{ApiError, ApiErrorKind, ApiOperation};
use crate::models::{
    Comment, CommentReply, FileUpload, LoginInput, LoginResponse, NewPost, Post, PostPatch,
    SignupInput, SignupResponse, User,
};
use crate::session::AccountSource;
use crate::wire::{self, CommentsEnvelope, PostEnvelope, PostsEnvelope, UserEnvelope};

/// One function per backend operation. Failures are always normalized
/// [`ApiError`]s; nothing is retried.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    cancel: CancellationToken,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = sanitize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base,
            client,
            cancel: CancellationToken::new(),
        })
    }

    pub fn from_config(config: &HubConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a client whose in-flight requests are cancelled when the
    /// returned guard drops (or when this client is cancelled).
    pub fn scoped(&self) -> (ApiClient, DropGuard) {
        let token = self.cancel.child_token();
        let scoped = Self {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            cancel: token.clone(),
        };
        (scoped, token.drop_guard())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn signup(&self, input: &SignupInput) -> Result<SignupResponse, ApiError> {
        let op = ApiOperation::Signup;
        let mut form = Form::new()
            .text("name", input.name.clone())
            .text("email", input.email.clone())
            .text("password", input.password.clone())
            .text("role", input.role.as_str());
        if let Some(id_number) = input.id_number.as_ref().filter(|n| !n.is_empty()) {
            form = form.text("idNumber", id_number.clone());
        }
        if let Some(info) = input.additional_info.as_ref().filter(|i| !i.is_empty()) {
            form = form.text("additionalInfo", info.clone());
        }
        if let Some(avatar) = &input.avatar {
            form = form.part("avatar", file_part(avatar));
        }
        let url = self.endpoint(op, &["auth", "signup"])?;
        let body = self.send(op, self.client.post(url).multipart(form)).await?;
        let wire = decode::<wire::WireSignupResponse>(op, &body)?;
        Ok(wire::signup_response(wire))
    }

    pub async fn login(&self, input: &LoginInput) -> Result<LoginResponse, ApiError> {
        let op = ApiOperation::Login;
        let url = self.endpoint(op, &["auth", "login"])?;
        let body = self.send(op, self.client.post(url).json(input)).await?;
        let wire = decode::<wire::WireLoginResponse>(op, &body)?;
        Ok(wire::login_response(wire))
    }

    pub async fn get_current_user(&self, token: &str) -> Result<User, ApiError> {
        let op = ApiOperation::CurrentUser;
        let url = self.endpoint(op, &["auth", "me"])?;
        let body = self
            .send(op, self.client.get(url).bearer_auth(token))
            .await?;
        let envelope = decode::<UserEnvelope>(op, &body)?;
        wire::normalize_user(wire::unwrap_user(envelope))
            .ok_or_else(|| ApiError::new(ApiErrorKind::Decode, "Invalid user data from server"))
    }

    pub async fn list_posts(&self, token: &str) -> Result<Vec<Post>, ApiError> {
        let op = ApiOperation::ListPosts;
        let url = self.endpoint(op, &[])?;
        let body = self
            .send(op, self.client.get(url).bearer_auth(token))
            .await?;
        let envelope = decode::<PostsEnvelope>(op, &body)?;
        Ok(wire::normalize_posts(wire::unwrap_posts(envelope)))
    }

    pub async fn create_post(&self, token: &str, input: &NewPost) -> Result<Post, ApiError> {
        let op = ApiOperation::CreatePost;
        let mut form = Form::new().text("content", input.content.clone());
        if let Some(attachment) = &input.media {
            form = form
                .part("media", file_part(&attachment.file))
                .text("mediaType", attachment.kind.as_str());
        }
        let url = self.endpoint(op, &["posts", "createPost"])?;
        let body = self
            .send(op, self.client.post(url).bearer_auth(token).multipart(form))
            .await?;
        let envelope = decode::<PostEnvelope>(op, &body)?;
        wire::normalize_post(wire::unwrap_post(envelope)).ok_or_else(|| ApiError::decode(op))
    }

    pub async fn edit_post(
        &self,
        token: &str,
        post_id: &str,
        content: &str,
    ) -> Result<PostPatch, ApiError> {
        let op = ApiOperation::EditPost;
        let url = self.endpoint(op, &["posts", post_id])?;
        let request = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&json!({ "content": content }));
        let body = self.send(op, request).await?;
        self.decode_patch(op, &body)
    }

    /// Returns the server's confirmation message, if it sent one.
    pub async fn delete_post(&self, token: &str, post_id: &str) -> Result<Option<String>, ApiError> {
        let op = ApiOperation::DeletePost;
        let url = self.endpoint(op, &["posts", post_id])?;
        let body = self
            .send(op, self.client.delete(url).bearer_auth(token))
            .await?;
        Ok(decode_value(&body)
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub async fn like_post(&self, token: &str, post_id: &str) -> Result<PostPatch, ApiError> {
        let op = ApiOperation::LikePost;
        let url = self.endpoint(op, &["posts", post_id, "like"])?;
        let body = self
            .send(op, self.client.post(url).bearer_auth(token))
            .await?;
        self.decode_patch(op, &body)
    }

    pub async fn unlike_post(&self, token: &str, post_id: &str) -> Result<PostPatch, ApiError> {
        let op = ApiOperation::UnlikePost;
        let url = self.endpoint(op, &["posts", post_id, "unlike"])?;
        let body = self
            .send(op, self.client.post(url).bearer_auth(token))
            .await?;
        self.decode_patch(op, &body)
    }

    /// Comments are readable anonymously; the token is attached when known.
    pub async fn list_comments(
        &self,
        post_id: &str,
        token: Option<&str>,
    ) -> Result<Vec<Comment>, ApiError> {
        let op = ApiOperation::ListComments;
        let url = self.endpoint(op, &["posts", post_id, "comments"])?;
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let body = self.send(op, request).await?;
        let envelope = decode::<CommentsEnvelope>(op, &body)?;
        Ok(wire::normalize_comments(
            wire::unwrap_comments(envelope),
            post_id,
        ))
    }

    pub async fn add_comment(
        &self,
        token: &str,
        post_id: &str,
        text: &str,
    ) -> Result<CommentReply, ApiError> {
        let op = ApiOperation::AddComment;
        let url = self.endpoint(op, &["posts", post_id, "comment"])?;
        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "text": text }));
        let body = self.send(op, request).await?;
        Ok(wire::comment_reply(decode_value(&body), post_id))
    }

    pub async fn update_comment(
        &self,
        token: &str,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<CommentReply, ApiError> {
        let op = ApiOperation::UpdateComment;
        let url = self.endpoint(op, &["posts", post_id, "comments", comment_id])?;
        let request = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&json!({ "text": text }));
        let body = self.send(op, request).await?;
        Ok(wire::comment_reply(decode_value(&body), post_id))
    }

    pub async fn delete_comment(
        &self,
        token: &str,
        post_id: &str,
        comment_id: &str,
    ) -> Result<CommentReply, ApiError> {
        let op = ApiOperation::DeleteComment;
        let url = self.endpoint(op, &["posts", post_id, "comments", comment_id])?;
        let body = self
            .send(op, self.client.delete(url).bearer_auth(token))
            .await?;
        Ok(wire::comment_reply(decode_value(&body), post_id))
    }

    fn decode_patch(&self, op: ApiOperation, body: &str) -> Result<PostPatch, ApiError> {
        let envelope = decode::<PostEnvelope>(op, body)?;
        wire::post_patch(wire::unwrap_post(envelope)).ok_or_else(|| ApiError::decode(op))
    }

    fn endpoint(&self, op: ApiOperation, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            warn!(operation = ?op, error = %err, "invalid base URL");
            ApiError::transport(op)
        })?;
        if !segments.is_empty() {
            let mut path = url.path_segments_mut().map_err(|_| {
                warn!(operation = ?op, "base URL cannot carry a path");
                ApiError::transport(op)
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// Sends the request and reads the whole body, racing both against this
    /// client's cancellation token.
    async fn send(&self, op: ApiOperation, request: RequestBuilder) -> Result<String, ApiError> {
        let exchange = async {
            let response = request.send().await.map_err(|err| {
                warn!(operation = ?op, error = %err, "request failed before a response");
                ApiError::transport(op)
            })?;
            let status = response.status();
            let body = response.text().await.map_err(|err| {
                warn!(operation = ?op, error = %err, "failed to read response body");
                ApiError::transport(op)
            })?;
            if !status.is_success() {
                let err = ApiError::from_status(op, status.as_u16(), &body);
                debug!(operation = ?op, status = status.as_u16(), message = %err.message, "request rejected");
                return Err(err);
            }
            debug!(operation = ?op, status = status.as_u16(), "request succeeded");
            Ok::<_, ApiError>(body)
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(operation = ?op, "request cancelled");
                Err(ApiError::cancelled(op))
            }
            result = exchange => result,
        }
    }
}

#[async_trait]
impl AccountSource for ApiClient {
    async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        self.get_current_user(token).await
    }
}

fn decode<T: DeserializeOwned>(op: ApiOperation, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|err| {
        warn!(operation = ?op, error = %err, "unexpected response shape");
        ApiError::decode(op)
    })
}

/// Confirmation bodies may be empty or non-JSON; both read as `null`.
fn decode_value(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or(Value::Null)
}

fn file_part(file: &FileUpload) -> Part {
    Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.mime)
        .unwrap_or_else(|_| Part::bytes(file.bytes.clone()).file_name(file.file_name.clone()))
}
