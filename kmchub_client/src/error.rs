use serde_json::Value;

/// Backend operations, used to pick the fallback message when the server
/// does not explain a failure itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    Signup,
    Login,
    CurrentUser,
    ListPosts,
    CreatePost,
    EditPost,
    DeletePost,
    LikePost,
    UnlikePost,
    ListComments,
    AddComment,
    UpdateComment,
    DeleteComment,
}

impl ApiOperation {
    pub fn fallback_message(self) -> &'static str {
        match self {
            ApiOperation::Signup => "Signup failed",
            ApiOperation::Login => "Login failed",
            ApiOperation::CurrentUser => "Failed to fetch user",
            ApiOperation::ListPosts => "Failed to fetch posts",
            ApiOperation::CreatePost => "Failed to create post",
            ApiOperation::EditPost => "Failed to edit post",
            ApiOperation::DeletePost => "Failed to delete post",
            ApiOperation::LikePost => "Failed to like post",
            ApiOperation::UnlikePost => "Failed to unlike post",
            ApiOperation::ListComments => "Failed to load comments",
            ApiOperation::AddComment => "Failed to add comment",
            ApiOperation::UpdateComment => "Failed to update comment",
            ApiOperation::DeleteComment => "Failed to delete comment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The request never produced a response (DNS, connect, timeout).
    Transport,
    /// Non-2xx response other than 401.
    Status(u16),
    /// 401: the bearer token is no longer accepted.
    Unauthorized,
    /// 2xx response whose body did not match the expected shape.
    Decode,
    /// The request scope was torn down before a response arrived.
    Cancelled,
}

/// Normalized REST failure. Callers only ever display `message`; transport
/// details stay inside the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub server_details: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            server_details: None,
        }
    }

    pub fn transport(operation: ApiOperation) -> Self {
        Self::new(ApiErrorKind::Transport, operation.fallback_message())
    }

    pub fn decode(operation: ApiOperation) -> Self {
        Self::new(ApiErrorKind::Decode, operation.fallback_message())
    }

    pub fn cancelled(operation: ApiOperation) -> Self {
        Self::new(ApiErrorKind::Cancelled, operation.fallback_message())
    }

    /// Builds the error for a non-2xx response, preferring whatever message
    /// the server put in the body.
    pub fn from_status(operation: ApiOperation, status: u16, body: &str) -> Self {
        let kind = if status == 401 {
            ApiErrorKind::Unauthorized
        } else {
            ApiErrorKind::Status(status)
        };
        let details = serde_json::from_str::<Value>(body).ok().or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        });
        let message = details
            .as_ref()
            .and_then(server_message)
            .unwrap_or_else(|| operation.fallback_message().to_string());
        Self {
            kind,
            message,
            server_details: details,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.kind == ApiErrorKind::Unauthorized
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ApiErrorKind::Cancelled
    }
}

/// Pulls a human readable message out of a backend error body:
/// `errors[0].message`, then `message`, then a string `error`.
fn server_message(body: &Value) -> Option<String> {
    let candidates = [
        body.get("errors")
            .and_then(|errors| errors.get(0))
            .and_then(|first| first.get("message")),
        body.get("message"),
        body.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures of the composed flows in [`crate::hub::Hub`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error("Please log in to {action}.")]
    NotSignedIn { action: &'static str },
    #[error("Only the author can {action}")]
    NotAuthor { action: &'static str },
    #[error("{0}")]
    Invalid(String),
    #[error("Session expired. Please log in again.")]
    SessionExpired,
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl HubError {
    /// Text a form shows in its global error slot.
    pub fn display_message(&self) -> String {
        self.to_string()
    }
}
