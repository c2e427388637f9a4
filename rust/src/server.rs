use anyhow::{anyhow, Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

use crate::client::{HtmlService, ImageUpload, IMAGE_FIELD};
use crate::main_ui_html::build_main_ui_html;
use crate::preview::PreviewSettings;
use crate::session::{EditorSession, SessionError, SessionSnapshot};

const MULTIPART_OVERHEAD_BYTES: usize = 200_000;
/// Body limit for the JSON routes carrying the whole document.
pub const MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;

pub struct AppState {
    pub session: EditorSession,
    pub service: Arc<dyn HtmlService>,
    pub preview: PreviewSettings,
    pub max_image_bytes: usize,
    pub server_port: AtomicU16,
}

type ApiResponse = (StatusCode, Json<Value>);

impl AppState {
    pub fn new(
        session: EditorSession,
        service: Arc<dyn HtmlService>,
        preview: PreviewSettings,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            session,
            service,
            preview,
            max_image_bytes,
            server_port: AtomicU16::new(0),
        }
    }
}

pub struct AppServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl AppServer {
    /// Binds `127.0.0.1` at `preferred_port` or the next free port after it
    /// (`0` asks the OS for any port) and serves on a background thread.
    pub fn start(state: Arc<AppState>, preferred_port: u16) -> Result<Self> {
        let listener = bind_listener(preferred_port)?;
        let port = listener
            .local_addr()
            .context("failed to inspect server local address")?
            .port();
        listener
            .set_nonblocking(true)
            .context("failed to set listener non-blocking")?;

        state.server_port.store(port, Ordering::Relaxed);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread_handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            let runtime = match runtime {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("failed to build server runtime: {err}");
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!("failed to register listener: {err}");
                        return;
                    }
                };

                let app = build_router(state);
                let server = axum::serve(listener, app).with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
                if let Err(err) = server.await {
                    error!("server stopped with error: {err}");
                }
            });
        });

        info!("editor server listening on http://127.0.0.1:{port}/");
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Blocks until the server thread exits.
    pub fn wait(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }
}

impl Drop for AppServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
struct EditReq {
    html: String,
}

#[derive(Debug, Default, Deserialize)]
struct SaveReq {
    #[serde(default)]
    html: Option<String>,
}

fn build_router(state: Arc<AppState>) -> Router {
    let port = state.server_port.load(Ordering::Relaxed);
    let mut origins = vec![HeaderValue::from_static("null")];
    for host in ["127.0.0.1", "localhost"] {
        match HeaderValue::from_str(&format!("http://{host}:{port}")) {
            Ok(origin) => origins.push(origin),
            Err(err) => warn!("skipping CORS origin for {host}: {err}"),
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let upload_limit = state.max_image_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/", get(get_main_page))
        .route("/ping", get(get_ping))
        .route("/app/init", get(get_app_init))
        .route(
            "/app/upload",
            post(post_app_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/app/edit", post(post_app_edit))
        .route("/app/save", post(post_app_save))
        .layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn get_main_page(State(state): State<Arc<AppState>>) -> Response {
    match state.session.snapshot() {
        Ok(snapshot) => Html(build_main_ui_html(&state.preview, &snapshot.document)).into_response(),
        Err(err) => session_err_json(&err).into_response(),
    }
}

async fn get_ping() -> ApiResponse {
    ok_json(json!({}))
}

async fn get_app_init(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.session.snapshot() {
        Ok(snapshot) => ok_snapshot(snapshot),
        Err(err) => session_err_json(&err),
    }
}

async fn post_app_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResponse {
    if state.session.is_busy() {
        return session_err_json(&SessionError::Busy);
    }

    let mut image = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(IMAGE_FIELD) {
                    continue;
                }
                let file_name = field.file_name().map(ToOwned::to_owned);
                let content_type = field.content_type().map(ToOwned::to_owned);
                match field.bytes().await {
                    Ok(bytes) => {
                        image = Some(ImageUpload::new(
                            file_name.as_deref(),
                            content_type.as_deref(),
                            bytes.to_vec(),
                        ))
                    }
                    Err(_) => return err_json(StatusCode::BAD_REQUEST, "invalid image"),
                }
            }
            Ok(None) => break,
            Err(_) => return err_json(StatusCode::BAD_REQUEST, "invalid multipart request"),
        }
    }

    let Some(image) = image.filter(|image| !image.bytes.is_empty()) else {
        return err_json(StatusCode::BAD_REQUEST, "image is required");
    };

    if image.bytes.len() > state.max_image_bytes {
        return err_json(
            StatusCode::BAD_REQUEST,
            &format!("image exceeds {} bytes", state.max_image_bytes),
        );
    }

    match state
        .session
        .generate_from_image(state.service.as_ref(), image)
        .await
    {
        Ok(snapshot) => ok_snapshot(snapshot),
        Err(err) => session_err_json(&err),
    }
}

async fn post_app_edit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EditReq>,
) -> ApiResponse {
    match state.session.edit(payload.html) {
        Ok(snapshot) => ok_snapshot(snapshot),
        Err(err) => session_err_json(&err),
    }
}

async fn post_app_save(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveReq>,
) -> ApiResponse {
    let message = match state
        .session
        .save(state.service.as_ref(), payload.html)
        .await
    {
        Ok(message) => message,
        Err(err) => return session_err_json(&err),
    };

    match state.session.snapshot() {
        Ok(snapshot) => ok_json(json!({
            "message": message,
            "revision": snapshot.revision,
            "last_saved_at": snapshot.last_saved_at,
        })),
        Err(err) => session_err_json(&err),
    }
}

fn ok_json(payload: Value) -> ApiResponse {
    let mut body = serde_json::Map::new();
    body.insert("ok".to_string(), Value::Bool(true));

    if let Some(obj) = payload.as_object() {
        for (key, value) in obj {
            body.insert(key.clone(), value.clone());
        }
    } else if !payload.is_null() {
        body.insert("data".to_string(), payload);
    }

    (StatusCode::OK, Json(Value::Object(body)))
}

fn ok_snapshot(snapshot: SessionSnapshot) -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "document": snapshot.document,
            "revision": snapshot.revision,
            "busy": snapshot.busy,
            "last_saved_at": snapshot.last_saved_at,
        })),
    )
}

fn err_json(status: StatusCode, message: &str) -> ApiResponse {
    (
        status,
        Json(json!({
            "ok": false,
            "error": message,
        })),
    )
}

fn session_err_json(err: &SessionError) -> ApiResponse {
    let status = match err {
        SessionError::Busy => StatusCode::CONFLICT,
        SessionError::GenerateFailed | SessionError::SaveFailed => StatusCode::BAD_GATEWAY,
        SessionError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
    };
    err_json(status, &err.to_string())
}

fn bind_listener(preferred_port: u16) -> Result<TcpListener> {
    if preferred_port == 0 {
        return TcpListener::bind(("127.0.0.1", 0)).context("failed to bind server port");
    }

    for offset in 0..200u16 {
        let port = preferred_port.saturating_add(offset);
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok(listener);
        }
    }

    Err(anyhow!("failed to bind server port"))
}
