//! In-process stand-in for the ComfyQueue backend.
//!
//! Serves the REST routes the client uses plus a minimal Socket.IO v4
//! endpoint over WebSocket, backed by in-memory state the tests can
//! inspect and mutate.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use comfyqueue_client::config::ClientConfig;
use comfyqueue_client::console::Console;
use comfyqueue_client::reconnect::ReconnectConfig;
use comfyqueue_client::storage::MemoryStorage;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Frame that makes the fake server drop every open socket.
const DROP_SOCKETS: &str = "__drop__";

pub const EDITOR: (&str, &str) = ("alice", "secret");
pub const ADMIN: (&str, &str) = ("admin", "admin-pass");

struct Account {
    id: i64,
    username: String,
    password: String,
    role: String,
}

#[derive(Default)]
struct Data {
    accounts: Vec<Account>,
    /// token -> username
    tokens: HashMap<String, String>,
    jobs: Vec<Value>,
    nodes: Vec<Value>,
    uploads: Vec<String>,
    next_id: i64,
}

struct Shared {
    data: Mutex<Data>,
    events: broadcast::Sender<String>,
    socket_connections: AtomicUsize,
    job_fetches: AtomicUsize,
    fail_node_writes: AtomicBool,
    reject_socket_namespace: AtomicBool,
}

#[derive(Clone)]
struct AppState {
    shared: Arc<Shared>,
}

pub struct Backend {
    addr: std::net::SocketAddr,
    shared: Arc<Shared>,
}

impl Backend {
    /// Start the fake backend on an ephemeral port.
    pub async fn spawn() -> Self {
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            data: Mutex::new(Data {
                accounts: vec![
                    Account {
                        id: 1,
                        username: ADMIN.0.into(),
                        password: ADMIN.1.into(),
                        role: "admin".into(),
                    },
                    Account {
                        id: 2,
                        username: EDITOR.0.into(),
                        password: EDITOR.1.into(),
                        role: "editor".into(),
                    },
                ],
                next_id: 100,
                ..Default::default()
            }),
            events,
            socket_connections: AtomicUsize::new(0),
            job_fetches: AtomicUsize::new(0),
            fail_node_writes: AtomicBool::new(false),
            reject_socket_namespace: AtomicBool::new(false),
        });

        let state = AppState {
            shared: Arc::clone(&shared),
        };
        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/me", get(me))
            .route("/api/jobs", get(list_jobs))
            .route("/api/nodes", get(list_nodes))
            .route("/api/nodes/toggle", post(toggle_node))
            .route("/api/nodes/add", post(add_node))
            .route("/api/nodes/{id}", put(update_node).delete(delete_node))
            .route("/upload", post(upload))
            .route("/api/users/", get(list_users).post(create_user))
            .route("/api/users/{id}", put(update_user).delete(delete_user))
            .route("/api/users/{id}/password", put(change_password))
            .route("/socket.io/", get(socket))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, shared }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this backend, with fast backoff.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.url()).unwrap();
        config.request_timeout_secs = 5;
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            ..Default::default()
        };
        config
    }

    /// A console over in-memory storage, not logged in.
    pub fn console(&self) -> Console {
        Console::new(self.config(), Box::new(MemoryStorage::new())).unwrap()
    }

    pub fn set_jobs(&self, jobs: Vec<Value>) {
        self.data().jobs = jobs;
    }

    pub fn set_nodes(&self, nodes: Vec<Value>) {
        self.data().nodes = nodes;
    }

    /// Replace or insert a job by id, as the worker side would.
    pub fn upsert_job(&self, job: Value) {
        let mut data = self.data();
        match data.jobs.iter_mut().find(|j| j["id"] == job["id"]) {
            Some(existing) => *existing = job,
            None => data.jobs.push(job),
        }
    }

    pub fn node_enabled(&self, name: &str) -> Option<bool> {
        self.data()
            .nodes
            .iter()
            .find(|n| n["name"] == name)
            .and_then(|n| n["enabled"].as_bool())
    }

    pub fn uploads(&self) -> Vec<String> {
        self.data().uploads.clone()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.data().accounts.iter().map(|a| a.username.clone()).collect()
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.data()
            .accounts
            .iter()
            .find(|a| a.username == username)
            .map(|a| a.password.clone())
    }

    /// Invalidate a token, as if it expired server-side.
    pub fn revoke(&self, token: &str) {
        self.data().tokens.remove(token);
    }

    /// Push a Socket.IO event to every connected socket.
    pub fn emit(&self, event: &str, payload: Value) {
        let frame = format!("42{}", json!([event, payload]));
        let _ = self.shared.events.send(frame);
    }

    /// Close every open socket from the server side.
    pub fn drop_sockets(&self) {
        let _ = self.shared.events.send(DROP_SOCKETS.to_string());
    }

    pub fn socket_connections(&self) -> usize {
        self.shared.socket_connections.load(Ordering::SeqCst)
    }

    /// Requests to `GET /api/jobs`, authorized or not.
    pub fn job_fetches(&self) -> usize {
        self.shared.job_fetches.load(Ordering::SeqCst)
    }

    pub fn fail_node_writes(&self, fail: bool) {
        self.shared.fail_node_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reject_socket_namespace(&self, reject: bool) {
        self.shared.reject_socket_namespace.store(reject, Ordering::SeqCst);
    }

    fn data(&self) -> std::sync::MutexGuard<'_, Data> {
        self.shared.data.lock().unwrap()
    }
}

pub fn job(id: i64, filename: &str, status: &str) -> Value {
    json!({ "id": id, "filename": filename, "status": status, "user": "alice", "node": null })
}

pub fn node(id: i64, name: &str, enabled: bool) -> Value {
    json!({ "id": id, "name": name, "url": format!("http://{name}:8188"), "enabled": enabled })
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Resolve the caller to `(username, role)` or a 401 response.
fn caller(state: &AppState, headers: &HeaderMap) -> Result<(String, String), Response> {
    let Some(token) = bearer(headers) else {
        return Err(reply(
            StatusCode::UNAUTHORIZED,
            json!({ "msg": "Missing Authorization Header" }),
        ));
    };
    let data = state.shared.data.lock().unwrap();
    let username = data
        .tokens
        .get(&token)
        .cloned()
        .ok_or_else(|| reply(StatusCode::UNAUTHORIZED, json!({ "msg": "Token has expired" })))?;
    let role = data
        .accounts
        .iter()
        .find(|a| a.username == username)
        .map(|a| a.role.clone())
        .unwrap_or_default();
    Ok((username, role))
}

fn admin(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    let (username, role) = caller(state, headers)?;
    if role != "admin" {
        return Err(reply(
            StatusCode::FORBIDDEN,
            json!({ "error": "Admin access required" }),
        ));
    }
    Ok(username)
}

async fn login(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let (Some(username), Some(password)) = (body["username"].as_str(), body["password"].as_str())
    else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({ "msg": "Missing username or password" }),
        );
    };

    let mut data = state.shared.data.lock().unwrap();
    let Some(account) = data
        .accounts
        .iter()
        .find(|a| a.username == username && a.password == password)
    else {
        return reply(
            StatusCode::UNAUTHORIZED,
            json!({ "msg": "Invalid username or password" }),
        );
    };

    let token = if username == EDITOR.0 {
        "t1".to_string()
    } else {
        format!("t-{username}")
    };
    let role = account.role.clone();
    data.tokens.insert(token.clone(), username.to_string());
    reply(StatusCode::OK, json!({ "access_token": token, "role": role }))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match caller(&state, &headers) {
        Ok((username, role)) => reply(StatusCode::OK, json!({ "username": username, "role": role })),
        Err(resp) => resp,
    }
}

async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.shared.job_fetches.fetch_add(1, Ordering::SeqCst);
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    let jobs = state.shared.data.lock().unwrap().jobs.clone();
    reply(StatusCode::OK, Value::Array(jobs))
}

async fn list_nodes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    let mut nodes = state.shared.data.lock().unwrap().nodes.clone();
    nodes.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    reply(StatusCode::OK, Value::Array(nodes))
}

fn node_write_failure(state: &AppState) -> Option<Response> {
    state
        .shared
        .fail_node_writes
        .load(Ordering::SeqCst)
        .then(|| reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "database is locked" })))
}

async fn toggle_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    if let Some(resp) = node_write_failure(&state) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    match data.nodes.iter_mut().find(|n| n["name"] == body["name"]) {
        Some(node) => {
            node["enabled"] = body["enabled"].clone();
            reply(StatusCode::OK, json!({ "status": "ok" }))
        }
        None => reply(StatusCode::NOT_FOUND, json!({ "error": "Node not found" })),
    }
}

async fn add_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    if data.nodes.iter().any(|n| n["name"] == body["name"]) {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "Node already exists" }));
    }
    data.next_id += 1;
    let id = data.next_id;
    data.nodes.push(json!({
        "id": id,
        "name": body["name"],
        "url": body["url"],
        "enabled": true,
    }));
    reply(StatusCode::CREATED, json!({ "id": id }))
}

async fn update_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let Some(node) = data.nodes.iter_mut().find(|n| n["id"] == id) else {
        return reply(StatusCode::NOT_FOUND, json!({ "error": "Node not found" }));
    };
    for key in ["name", "url", "enabled"] {
        if let Some(value) = body.get(key) {
            node[key] = value.clone();
        }
    }
    reply(StatusCode::OK, json!({ "status": "updated" }))
}

async fn delete_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let before = data.nodes.len();
    data.nodes.retain(|n| n["id"] != id);
    if data.nodes.len() == before {
        return reply(StatusCode::NOT_FOUND, json!({ "error": "Node not found" }));
    }
    reply(StatusCode::OK, json!({ "status": "deleted" }))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let username = match caller(&state, &headers) {
        Ok((username, _)) => username,
        Err(resp) => return resp,
    };

    let mut filename = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            let _ = field.bytes().await;
        }
    }
    let Some(filename) = filename else {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "No file" }));
    };

    {
        let mut data = state.shared.data.lock().unwrap();
        data.next_id += 1;
        let id = data.next_id;
        data.jobs.push(json!({
            "id": id,
            "filename": filename,
            "status": "pending",
            "user": username,
            "node": null,
            "created_at": "2026-10-17 09:30:00",
        }));
        data.uploads.push(filename.clone());
    }

    let frame = format!("42{}", json!(["new_job", { "file": filename }]));
    let _ = state.shared.events.send(frame);
    reply(StatusCode::OK, json!({ "status": "queued" }))
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    let data = state.shared.data.lock().unwrap();
    let users: Vec<Value> = data
        .accounts
        .iter()
        .map(|a| json!({ "id": a.id, "username": a.username, "role": a.role }))
        .collect();
    reply(StatusCode::OK, Value::Array(users))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let username = body["username"].as_str().unwrap_or_default().to_string();
    if data.accounts.iter().any(|a| a.username == username) {
        return reply(StatusCode::BAD_REQUEST, json!({ "msg": "User already exists" }));
    }
    data.next_id += 1;
    let id = data.next_id;
    data.accounts.push(Account {
        id,
        username,
        password: body["password"].as_str().unwrap_or_default().to_string(),
        role: body["role"].as_str().unwrap_or("editor").to_string(),
    });
    reply(StatusCode::CREATED, json!({ "msg": "User created" }))
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let Some(account) = data.accounts.iter_mut().find(|a| a.id == id) else {
        return reply(StatusCode::NOT_FOUND, json!({ "msg": "User not found" }));
    };
    if let Some(username) = body["username"].as_str() {
        account.username = username.to_string();
    }
    if let Some(role) = body["role"].as_str() {
        account.role = role.to_string();
    }
    reply(StatusCode::OK, json!({ "msg": "User updated" }))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let Some(account) = data.accounts.iter_mut().find(|a| a.id == id) else {
        return reply(StatusCode::NOT_FOUND, json!({ "msg": "User not found" }));
    };
    account.password = body["password"].as_str().unwrap_or_default().to_string();
    reply(StatusCode::OK, json!({ "msg": "Password updated" }))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = admin(&state, &headers) {
        return resp;
    }
    let mut data = state.shared.data.lock().unwrap();
    let before = data.accounts.len();
    data.accounts.retain(|a| a.id != id);
    if data.accounts.len() == before {
        return reply(StatusCode::NOT_FOUND, json!({ "msg": "User not found" }));
    }
    reply(StatusCode::OK, json!({ "msg": "User deleted" }))
}

// ---------------------------------------------------------------------------
// Socket.IO
// ---------------------------------------------------------------------------

async fn socket(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if let Err(resp) = caller(&state, &headers) {
        return resp;
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state.shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let (mut sink, mut stream) = socket.split();
    let open = json!({
        "sid": "engine-sid",
        "upgrades": [],
        "pingInterval": 25000,
        "pingTimeout": 20000,
        "maxPayload": 1000000,
    });
    if sink.send(Message::Text(format!("0{open}").into())).await.is_err() {
        return;
    }

    // Wait for the namespace connect.
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) if text.as_str().starts_with("40") => break,
            Some(Ok(_)) => continue,
            _ => return,
        }
    }

    if shared.reject_socket_namespace.load(Ordering::SeqCst) {
        let _ = sink
            .send(Message::Text(r#"44{"message":"Unauthorized"}"#.to_string().into()))
            .await;
        return;
    }

    let mut events = shared.events.subscribe();
    shared.socket_connections.fetch_add(1, Ordering::SeqCst);
    // Exercise the client's pong path before the ack.
    let _ = sink.send(Message::Text("2".to_string().into())).await;
    if sink
        .send(Message::Text(r#"40{"sid":"socket-sid"}"#.to_string().into()))
        .await
        .is_err()
    {
        shared.socket_connections.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    loop {
        tokio::select! {
            frame = events.recv() => {
                let Ok(frame) = frame else { break };
                if frame == DROP_SOCKETS {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if matches!(text.as_str(), "41" | "1") => break,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    shared.socket_connections.fetch_sub(1, Ordering::SeqCst);
}
