use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::client::{HtmlService, ImageUpload};

pub const DEFAULT_PLACEHOLDER_HTML: &str = "<div>Upload an image to generate HTML</div>";
pub const GENERATE_FAILED_MESSAGE: &str = "Failed to generate HTML from image";
pub const SAVE_FAILED_MESSAGE: &str = "Failed to save HTML";
pub const SAVE_SUCCEEDED_MESSAGE: &str = "HTML saved successfully!";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a generation request is already in progress")]
    Busy,
    #[error("Failed to generate HTML from image")]
    GenerateFailed,
    #[error("Failed to save HTML")]
    SaveFailed,
    #[error("editor state lock error")]
    Poisoned,
}

/// The HTML being edited. Any string is accepted, malformed markup included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    text: String,
    revision: u64,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            revision: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn replace(&mut self, text: String) -> u64 {
        self.text = text;
        self.revision += 1;
        self.revision
    }
}

#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

impl BusyFlag {
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `None` while another guard is alive.
    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag: &self.0 })
    }
}

/// Clears the busy flag when dropped, whichever way the holder exits.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub document: String,
    pub revision: u64,
    pub busy: bool,
    pub last_saved_at: Option<String>,
}

pub struct EditorSession {
    document: Mutex<Document>,
    busy: BusyFlag,
    last_saved_at: Mutex<Option<String>>,
}

impl EditorSession {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Document::new(placeholder)),
            busy: BusyFlag::default(),
            last_saved_at: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (document, revision) = {
            let doc = self.document()?;
            (doc.text().to_string(), doc.revision())
        };
        let last_saved_at = self
            .last_saved_at
            .lock()
            .map_err(|_| SessionError::Poisoned)?
            .clone();

        Ok(SessionSnapshot {
            document,
            revision,
            busy: self.is_busy(),
            last_saved_at,
        })
    }

    /// Replaces the document with the raw editor value.
    pub fn edit(&self, html: String) -> Result<SessionSnapshot, SessionError> {
        self.document()?.replace(html);
        self.snapshot()
    }

    /// Sends the image to the service and swaps in the returned HTML.
    ///
    /// Only one generation may be in flight; a second call gets
    /// `SessionError::Busy` without contacting the service. On failure the
    /// document is left untouched. Edits made while the request is pending
    /// are overwritten by the result.
    pub async fn generate_from_image(
        &self,
        service: &dyn HtmlService,
        image: ImageUpload,
    ) -> Result<SessionSnapshot, SessionError> {
        let guard = self.busy.try_acquire().ok_or(SessionError::Busy)?;
        info!(
            "generating HTML from {} ({} bytes)",
            image.file_name,
            image.bytes.len()
        );

        let started_at = self.document()?.revision();
        let result = service.generate(image).await;

        let html = match result {
            Ok(html) => html,
            Err(err) => {
                error!("Failed to generate HTML: {err}");
                return Err(SessionError::GenerateFailed);
            }
        };

        {
            let mut doc = self.document()?;
            if doc.revision() != started_at {
                warn!(
                    "document changed during generation (revision {} -> {}); generated HTML replaces it",
                    started_at,
                    doc.revision()
                );
            }
            let revision = doc.replace(html);
            info!("document replaced by generated HTML (revision {revision})");
        }

        drop(guard);
        self.snapshot()
    }

    /// Saves the document verbatim and returns the user-facing notice.
    ///
    /// `editor_text` is what the page currently shows. It becomes the document
    /// before the service is called, so an edit that never synced is still
    /// what gets saved.
    pub async fn save(
        &self,
        service: &dyn HtmlService,
        editor_text: Option<String>,
    ) -> Result<&'static str, SessionError> {
        let html = {
            let mut doc = self.document()?;
            if let Some(text) = editor_text.filter(|text| text != doc.text()) {
                let revision = doc.replace(text);
                info!("document taken from editor before save (revision {revision})");
            }
            doc.text().to_string()
        };
        match service.save(&html).await {
            Ok(()) => {
                let saved_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                info!("saved HTML ({} bytes) at {saved_at}", html.len());
                *self
                    .last_saved_at
                    .lock()
                    .map_err(|_| SessionError::Poisoned)? = Some(saved_at);
                Ok(SAVE_SUCCEEDED_MESSAGE)
            }
            Err(err) => {
                error!("Failed to save HTML: {err}");
                Err(SessionError::SaveFailed)
            }
        }
    }

    fn document(&self) -> Result<MutexGuard<'_, Document>, SessionError> {
        self.document.lock().map_err(|_| SessionError::Poisoned)
    }
}
