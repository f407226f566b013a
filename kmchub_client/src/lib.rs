//! Client core for KMC Hub: session handling, the REST client, the feed and
//! comment stores, and headless form state.

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod forms;
pub mod hub;
pub mod models;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod validation;
pub mod wire;

pub use api::ApiClient;
pub use config::{HubConfig, StaticAssets};
pub use error::{ApiError, ApiErrorKind, ApiOperation, HubError, StorageError};
pub use feed::{CommentStore, FeedStore};
pub use forms::{Form, FormPhase, Redirect};
pub use hub::Hub;
pub use models::{
    Comment, FileUpload, LoginInput, Media, MediaKind, NewPost, Post, PostPatch, Role,
    SignupInput, User, UserRef,
};
pub use session::{AccountSource, CommitOutcome, Session, SessionCommand, SessionStore};
pub use storage::{DurableStorage, FileStorage, MemoryStorage};
pub use telemetry::init_tracing;
pub use validation::{Field, FieldErrors};
