use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub const DEFAULT_SERVICE_BASE_URL: &str = "http://localhost:8000";
pub const GENERATE_PATH: &str = "/generate-html";
pub const SAVE_PATH: &str = "/save-html";
pub const IMAGE_FIELD: &str = "image";
pub const DEFAULT_FILE_NAME: &str = "upload.bin";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: Option<&str>, content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let file_name = file_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILE_NAME)
            .to_string();
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| ct.contains('/'))
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        Self {
            file_name,
            content_type,
            bytes,
        }
    }
}

/// Remote service that turns images into HTML and stores edited HTML.
pub trait HtmlService: Send + Sync {
    fn generate<'a>(&'a self, image: ImageUpload) -> ServiceFuture<'a, String>;
    fn save<'a>(&'a self, html: &'a str) -> ServiceFuture<'a, ()>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    html: String,
}

#[derive(Debug, Serialize)]
struct SaveRequest<'a> {
    html: &'a str,
}

/// `reqwest` client for the generation service. No retries, no caching.
pub struct HttpHtmlService {
    client: Client,
    generate_url: String,
    save_url: String,
}

impl HttpHtmlService {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(base_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            generate_url: format!("{base_url}{GENERATE_PATH}"),
            save_url: format!("{base_url}{SAVE_PATH}"),
        })
    }

    pub fn generate_url(&self) -> &str {
        &self.generate_url
    }

    pub fn save_url(&self) -> &str {
        &self.save_url
    }

    async fn generate_html(&self, image: ImageUpload) -> Result<String, ClientError> {
        debug!(
            "POST {} ({}, {} bytes)",
            self.generate_url,
            image.file_name,
            image.bytes.len()
        );
        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.content_type)?;
        let form = Form::new().part(IMAGE_FIELD, part);

        let response = self
            .client
            .post(&self.generate_url)
            .multipart(form)
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        Ok(parsed.html)
    }

    async fn save_html(&self, html: &str) -> Result<(), ClientError> {
        debug!("POST {} ({} bytes)", self.save_url, html.len());
        let response = self
            .client
            .post(&self.save_url)
            .json(&SaveRequest { html })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

impl HtmlService for HttpHtmlService {
    fn generate<'a>(&'a self, image: ImageUpload) -> ServiceFuture<'a, String> {
        Box::pin(self.generate_html(image))
    }

    fn save<'a>(&'a self, html: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(self.save_html(html))
    }
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    Err(ClientError::Status { status, body })
}

pub fn normalize_base_url(input: &str) -> Result<String, ClientError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::InvalidConfig(
            "base_url must not be empty".to_string(),
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::InvalidConfig(format!(
            "base_url must start with http:// or https://: {trimmed}"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{HtmlService, ImageUpload, ServiceFuture};
    use crate::error::ClientError;
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-process service double. Optionally holds `generate` until released.
    pub struct StubService {
        generated_html: Option<String>,
        save_fails: bool,
        gate: Option<Notify>,
        pub uploads: Mutex<Vec<ImageUpload>>,
        pub saved: Mutex<Vec<String>>,
    }

    impl StubService {
        pub fn returning(html: &str) -> Self {
            Self {
                generated_html: Some(html.to_string()),
                save_fails: false,
                gate: None,
                uploads: Mutex::new(Vec::new()),
                saved: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                generated_html: None,
                save_fails: true,
                ..Self::returning("")
            }
        }

        pub fn gated(mut self) -> Self {
            self.gate = Some(Notify::new());
            self
        }

        pub fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_one();
            }
        }

        pub fn saved(&self) -> Vec<String> {
            self.saved.lock().map(|v| v.clone()).unwrap_or_default()
        }

        pub fn upload_count(&self) -> usize {
            self.uploads.lock().map(|v| v.len()).unwrap_or_default()
        }

        fn failure() -> ClientError {
            ClientError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "stub failure".to_string(),
            }
        }
    }

    impl HtmlService for StubService {
        fn generate<'a>(&'a self, image: ImageUpload) -> ServiceFuture<'a, String> {
            Box::pin(async move {
                if let Ok(mut uploads) = self.uploads.lock() {
                    uploads.push(image);
                }
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                self.generated_html.clone().ok_or_else(Self::failure)
            })
        }

        fn save<'a>(&'a self, html: &'a str) -> ServiceFuture<'a, ()> {
            Box::pin(async move {
                if let Ok(mut saved) = self.saved.lock() {
                    saved.push(html.to_string());
                }
                if self.save_fails {
                    Err(Self::failure())
                } else {
                    Ok(())
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Upstream {
        fields: Mutex<Vec<(String, String, String, Vec<u8>)>>,
        saved: Mutex<Vec<Value>>,
        save_status: Mutex<Option<StatusCode>>,
        generate_body: Mutex<Option<Value>>,
    }

    async fn upstream_generate(
        State(upstream): State<Arc<Upstream>>,
        mut multipart: Multipart,
    ) -> (StatusCode, Json<Value>) {
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            if let Ok(mut fields) = upstream.fields.lock() {
                fields.push((name, file_name, content_type, bytes));
            }
        }
        let body = upstream
            .generate_body
            .lock()
            .ok()
            .and_then(|b| b.clone())
            .unwrap_or_else(|| json!({ "html": "<div>A</div>" }));
        (StatusCode::OK, Json(body))
    }

    async fn upstream_save(
        State(upstream): State<Arc<Upstream>>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if let Ok(mut saved) = upstream.saved.lock() {
            saved.push(body);
        }
        let status = upstream
            .save_status
            .lock()
            .ok()
            .and_then(|s| *s)
            .unwrap_or(StatusCode::OK);
        (status, Json(json!({ "success": status.is_success() })))
    }

    async fn spawn_upstream(upstream: Arc<Upstream>) -> String {
        let app = Router::new()
            .route(GENERATE_PATH, post(upstream_generate))
            .route(SAVE_PATH, post(upstream_save))
            .with_state(upstream);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind upstream");
        let addr = listener.local_addr().expect("upstream addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/")
    }

    fn photo() -> ImageUpload {
        ImageUpload::new(Some("photo.png"), Some("image/png"), vec![0x89, b'P', b'N', b'G'])
    }

    #[test]
    fn base_url_is_trimmed_and_validated() {
        assert_eq!(
            normalize_base_url(" http://localhost:8000/ ").expect("valid"),
            "http://localhost:8000"
        );
        assert!(matches!(
            normalize_base_url(""),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(matches!(
            normalize_base_url("localhost:8000"),
            Err(ClientError::InvalidConfig(_))
        ));

        let service = HttpHtmlService::new("https://example.com/api/", None).expect("service");
        assert_eq!(service.generate_url(), "https://example.com/api/generate-html");
        assert_eq!(service.save_url(), "https://example.com/api/save-html");
    }

    #[test]
    fn image_upload_falls_back_to_generic_metadata() {
        let image = ImageUpload::new(Some("  "), Some("garbage"), vec![1]);
        assert_eq!(image.file_name, DEFAULT_FILE_NAME);
        assert_eq!(image.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn generate_posts_single_image_field_and_returns_html_verbatim() {
        let upstream = Arc::new(Upstream::default());
        if let Ok(mut body) = upstream.generate_body.lock() {
            *body = Some(json!({ "html": "  <div>A</div>\n", "extra": 1 }));
        }
        let base_url = spawn_upstream(upstream.clone()).await;
        let service = HttpHtmlService::new(&base_url, None).expect("service");

        let html = service.generate(photo()).await.expect("generate");
        assert_eq!(html, "  <div>A</div>\n");

        let fields = upstream.fields.lock().expect("fields").clone();
        assert_eq!(fields.len(), 1);
        let (name, file_name, content_type, bytes) = &fields[0];
        assert_eq!(name, IMAGE_FIELD);
        assert_eq!(file_name, "photo.png");
        assert_eq!(content_type, "image/png");
        assert_eq!(bytes, &vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn generate_without_html_field_is_a_failure() {
        let upstream = Arc::new(Upstream::default());
        if let Ok(mut body) = upstream.generate_body.lock() {
            *body = Some(json!({ "detail": "nothing here" }));
        }
        let base_url = spawn_upstream(upstream).await;
        let service = HttpHtmlService::new(&base_url, None).expect("service");

        let err = service.generate(photo()).await.expect_err("missing html");
        assert!(matches!(err, ClientError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn save_sends_html_verbatim_as_json() {
        let upstream = Arc::new(Upstream::default());
        let base_url = spawn_upstream(upstream.clone()).await;
        let service = HttpHtmlService::new(&base_url, None).expect("service");

        service.save("<p>x</p>").await.expect("save");

        let saved = upstream.saved.lock().expect("saved").clone();
        assert_eq!(saved, vec![json!({ "html": "<p>x</p>" })]);
    }

    #[tokio::test]
    async fn save_reports_non_success_status() {
        let upstream = Arc::new(Upstream::default());
        if let Ok(mut status) = upstream.save_status.lock() {
            *status = Some(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let base_url = spawn_upstream(upstream).await;
        let service = HttpHtmlService::new(&base_url, None).expect("service");

        let err = service.save("<p>x</p>").await.expect_err("500");
        match err {
            ClientError::Status { status, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let service = HttpHtmlService::new(&format!("http://{addr}"), Some(Duration::from_secs(5)))
            .expect("service");
        let err = service.generate(photo()).await.expect_err("refused");
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
