#![allow(dead_code)]

//! In-process stand-in for the KMC Hub backend. It speaks the same wire
//! shapes (`_id`, `userId`, `User` vs `user`, wrapped and bare records) and
//! records which bearer token each request carried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const ADA_TOKEN: &str = "tok-ada";
pub const BEN_TOKEN: &str = "tok-ben";
pub const EXPIRED_TOKEN: &str = "tok-expired";

type Shared = Arc<Mutex<BackendState>>;
type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub route: &'static str,
    pub bearer: Option<String>,
}

#[derive(Default)]
pub struct BackendState {
    posts: Vec<Value>,
    comments: HashMap<String, Vec<Value>>,
    next_id: u64,
    delay: Option<Duration>,
    pub requests: Vec<SeenRequest>,
    pub signups: Vec<HashMap<String, String>>,
}

impl BackendState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn post_mut(&mut self, id: &str) -> Option<&mut Value> {
        self.posts.iter_mut().find(|p| p["_id"] == id)
    }
}

pub struct MockBackend {
    pub base_url: String,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(BackendState::default()));
        let router = Router::new()
            .route("/api", get(list_posts))
            .route("/api/auth/login", post(login))
            .route("/api/auth/signup", post(signup))
            .route("/api/auth/me", get(me))
            .route("/api/posts/createPost", post(create_post))
            .route("/api/posts/:id", put(edit_post).delete(delete_post))
            .route("/api/posts/:id/like", post(like_post))
            .route("/api/posts/:id/unlike", post(unlike_post))
            .route("/api/posts/:id/comments", get(list_comments))
            .route("/api/posts/:id/comment", post(add_comment))
            .route(
                "/api/posts/:id/comments/:comment_id",
                put(update_comment).delete(delete_comment),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });
        Self {
            base_url: format!("http://{addr}/api"),
            state,
            server,
        }
    }

    /// Adds a post authored by `author_id` to the end of the server feed.
    pub fn seed_post(&self, id: &str, author_id: &str, content: &str) {
        let post = json!({
            "_id": id,
            "userId": author_json(author_id),
            "content": content,
            "media": [],
            "likes": [],
            "createdAt": "2024-05-01T12:00:00Z",
        });
        self.lock().posts.push(post);
    }

    pub fn bearers_for(&self, route: &str) -> Vec<Option<String>> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.route == route)
            .map(|r| r.bearer.clone())
            .collect()
    }

    pub fn signups(&self) -> Vec<HashMap<String, String>> {
        self.lock().signups.clone()
    }

    /// Holds the feed and delete-post responses back by `delay` so a test
    /// can change client state while those requests are in flight.
    pub fn delay_responses(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn server_post(&self, id: &str) -> Option<Value> {
        self.lock().posts.iter().find(|p| p["_id"] == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().expect("backend state")
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn user_json(id: &str) -> Value {
    match id {
        "u1" => json!({"_id": "u1", "name": "Ada", "email": "ada@kmc.edu", "role": "Teacher"}),
        "u2" => json!({
            "id": "u2",
            "name": "Ben",
            "email": "ben@kmc.edu",
            "role": "Student",
            "idNumber": "12345678"
        }),
        other => json!({"_id": other, "name": "Someone", "email": "someone@kmc.edu", "role": "Student"}),
    }
}

fn author_json(id: &str) -> Value {
    let user = user_json(id);
    json!({"_id": id, "name": user["name"]})
}

fn failure(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": message })))
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn record(state: &Shared, headers: &HeaderMap, route: &'static str) -> Option<String> {
    let token = bearer(headers);
    state.lock().expect("backend state").requests.push(SeenRequest {
        route,
        bearer: token.clone(),
    });
    token
}

fn authenticate(
    state: &Shared,
    headers: &HeaderMap,
    route: &'static str,
) -> Result<&'static str, (StatusCode, Json<Value>)> {
    match record(state, headers, route).as_deref() {
        Some(ADA_TOKEN) => Ok("u1"),
        Some(BEN_TOKEN) => Ok("u2"),
        Some(_) => Err(failure(StatusCode::UNAUTHORIZED, "Token is not valid")),
        None => Err(failure(StatusCode::UNAUTHORIZED, "No token, authorization denied")),
    }
}

fn not_found(what: &str) -> (StatusCode, Json<Value>) {
    failure(StatusCode::NOT_FOUND, &format!("{what} not found"))
}

async fn login(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    record(&state, &headers, "POST /auth/login");
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    match (email, password) {
        ("ada@kmc.edu", "secret1") => Ok(Json(json!({
            "message": "Login successful",
            "token": ADA_TOKEN,
            "User": user_json("u1"),
        }))),
        ("ben@kmc.edu", "secret2") => Ok(Json(json!({
            "message": "Login successful",
            "token": BEN_TOKEN,
            "user": user_json("u2"),
        }))),
        _ => Err(failure(StatusCode::BAD_REQUEST, "Invalid credentials")),
    }
}

async fn signup(State(state): State<Shared>, mut multipart: Multipart) -> Reply {
    let mut fields = HashMap::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "avatar" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map(|b| b.len()).unwrap_or_default();
            fields.insert(name, format!("{file_name}:{bytes}"));
        } else {
            fields.insert(name, field.text().await.unwrap_or_default());
        }
    }
    if fields.get("email").map(String::as_str) == Some("ada@kmc.edu") {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": "Validation failed",
                "errors": [{"message": "Email already registered"}]
            })),
        ));
    }
    let mut state = state.lock().expect("backend state");
    let id = state.next_id("u");
    let user = json!({
        "_id": id,
        "name": fields.get("name"),
        "email": fields.get("email"),
        "role": fields.get("role"),
    });
    state.signups.push(fields);
    Ok(Json(json!({"message": "User registered successfully", "user": user})))
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let user_id = authenticate(&state, &headers, "GET /auth/me")?;
    Ok(Json(json!({ "user": user_json(user_id) })))
}

async fn lag(state: &Shared) {
    let delay = state.lock().expect("backend state").delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

async fn list_posts(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    lag(&state).await;
    authenticate(&state, &headers, "GET /")?;
    let posts = state.lock().expect("backend state").posts.clone();
    Ok(Json(json!({ "posts": posts })))
}

async fn create_post(
    State(state): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Reply {
    let user_id = authenticate(&state, &headers, "POST /posts/createPost")?;
    let mut content = String::new();
    let mut media_type = None;
    let mut media_name = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or_default() {
            "content" => content = field.text().await.unwrap_or_default(),
            "mediaType" => media_type = field.text().await.ok(),
            "media" => media_name = field.file_name().map(str::to_string),
            _ => {}
        }
    }
    let media = match (media_name, media_type) {
        (Some(name), Some(kind)) => json!([{ "url": format!("/uploads/{name}"), "type": kind }]),
        _ => json!([]),
    };
    let mut state = state.lock().expect("backend state");
    let id = state.next_id("p");
    let post = json!({
        "_id": id,
        "userId": author_json(user_id),
        "content": content,
        "media": media,
        "likes": [],
        "createdAt": Utc::now().to_rfc3339(),
    });
    state.posts.insert(0, post.clone());
    Ok(Json(json!({ "post": post })))
}

async fn edit_post(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let user_id = authenticate(&state, &headers, "PUT /posts/:id")?;
    let mut state = state.lock().expect("backend state");
    let post = state.post_mut(&id).ok_or_else(|| not_found("Post"))?;
    if post["userId"]["_id"] != user_id {
        return Err(failure(StatusCode::FORBIDDEN, "Not authorized"));
    }
    post["content"] = body["content"].clone();
    post["updatedAt"] = json!(Utc::now().to_rfc3339());
    // Edits answer with the bare post.
    Ok(Json(post.clone()))
}

async fn delete_post(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    lag(&state).await;
    authenticate(&state, &headers, "DELETE /posts/:id")?;
    let mut state = state.lock().expect("backend state");
    let before = state.posts.len();
    state.posts.retain(|p| p["_id"] != id.as_str());
    if state.posts.len() == before {
        return Err(not_found("Post"));
    }
    Ok(Json(json!({ "message": "Post deleted" })))
}

async fn like_post(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let user_id = authenticate(&state, &headers, "POST /posts/:id/like")?;
    let mut state = state.lock().expect("backend state");
    let post = state.post_mut(&id).ok_or_else(|| not_found("Post"))?;
    let likes = post["likes"].as_array_mut().expect("likes array");
    if !likes.iter().any(|l| l == user_id) {
        likes.push(json!(user_id));
    }
    Ok(Json(json!({ "post": post.clone() })))
}

async fn unlike_post(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    let user_id = authenticate(&state, &headers, "POST /posts/:id/unlike")?;
    let mut state = state.lock().expect("backend state");
    let post = state.post_mut(&id).ok_or_else(|| not_found("Post"))?;
    post["likes"]
        .as_array_mut()
        .expect("likes array")
        .retain(|l| l != user_id);
    Ok(Json(post.clone()))
}

async fn list_comments(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Reply {
    record(&state, &headers, "GET /posts/:id/comments");
    let comments = state
        .lock()
        .expect("backend state")
        .comments
        .get(&id)
        .cloned()
        .unwrap_or_default();
    Ok(Json(json!({ "comments": comments })))
}

async fn add_comment(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let user_id = authenticate(&state, &headers, "POST /posts/:id/comment")?;
    let mut state = state.lock().expect("backend state");
    let comment_id = state.next_id("c");
    let comment = json!({
        "_id": comment_id,
        "postId": id,
        "userId": author_json(user_id),
        "text": body["text"],
        "createdAt": Utc::now().to_rfc3339(),
    });
    state.comments.entry(id).or_default().push(comment.clone());
    Ok(Json(json!({ "comment": comment })))
}

async fn update_comment(
    State(state): State<Shared>,
    Path((id, comment_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    let user_id = authenticate(&state, &headers, "PUT /posts/:id/comments/:comment_id")?;
    let mut state = state.lock().expect("backend state");
    let comment = state
        .comments
        .get_mut(&id)
        .and_then(|list| list.iter_mut().find(|c| c["_id"] == comment_id.as_str()))
        .ok_or_else(|| not_found("Comment"))?;
    if comment["userId"]["_id"] != user_id {
        return Err(failure(StatusCode::FORBIDDEN, "Not authorized"));
    }
    comment["text"] = body["text"].clone();
    Ok(Json(json!({ "comment": comment.clone() })))
}

async fn delete_comment(
    State(state): State<Shared>,
    Path((id, comment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    authenticate(&state, &headers, "DELETE /posts/:id/comments/:comment_id")?;
    let mut state = state.lock().expect("backend state");
    if let Some(list) = state.comments.get_mut(&id) {
        list.retain(|c| c["_id"] != comment_id.as_str());
    }
    Ok(Json(json!({ "message": "Comment deleted" })))
}
