use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml::map::Map;
use toml::Value;

use crate::client::{normalize_base_url, DEFAULT_SERVICE_BASE_URL};
use crate::preview::{PreviewSettings, SandboxPolicy, DEFAULT_ZOOM};
use crate::session::DEFAULT_PLACEHOLDER_HTML;

pub const DEFAULT_SERVER_PORT: i64 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_SEC: i64 = 120;
pub const DEFAULT_MAX_IMAGE_BYTES: i64 = 20 * 1024 * 1024;

/// TOML settings file. Missing or invalid keys are replaced with defaults
/// and the normalized document is written back on load.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    doc: Value,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let doc = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("failed to parse TOML: {}", path.display()))?
        } else {
            info!("config not found, writing defaults to {}", path.display());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config dir: {}", parent.display())
                })?;
            }
            Value::Table(Map::new())
        };

        let mut store = Self { path, doc };
        store.normalize_doc();
        store.save()?;
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        let text = toml::to_string_pretty(&self.doc).context("failed to serialize TOML")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write config: {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn server_port(&self) -> u16 {
        self.table("app")
            .and_then(|t| t.get("server_port"))
            .and_then(value_to_i64)
            .and_then(|v| u16::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SERVER_PORT as u16)
    }

    pub fn placeholder_html(&self) -> String {
        self.table("app")
            .and_then(|t| t.get("placeholder_html"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| DEFAULT_PLACEHOLDER_HTML.to_string())
    }

    pub fn service_base_url(&self) -> String {
        self.table("service")
            .and_then(|t| t.get("base_url"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| DEFAULT_SERVICE_BASE_URL.to_string())
    }

    /// `None` when the timeout is disabled (`request_timeout_sec = 0`).
    pub fn request_timeout(&self) -> Option<Duration> {
        let secs = self
            .table("service")
            .and_then(|t| t.get("request_timeout_sec"))
            .and_then(value_to_i64)
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SEC);
        u64::try_from(secs)
            .ok()
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
    }

    pub fn max_image_bytes(&self) -> usize {
        self.table("service")
            .and_then(|t| t.get("max_image_bytes"))
            .and_then(value_to_i64)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_IMAGE_BYTES as usize)
    }

    pub fn preview_settings(&self) -> PreviewSettings {
        let preview = self.table("preview");
        let sandbox = preview
            .and_then(|t| t.get("sandbox"))
            .and_then(Value::as_str)
            .map(SandboxPolicy::from_config)
            .unwrap_or_default();
        let presets: Vec<i64> = preview
            .and_then(|t| t.get("zoom_presets"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(value_to_i64).collect())
            .unwrap_or_default();
        let default_zoom = preview
            .and_then(|t| t.get("default_zoom"))
            .and_then(value_to_i64)
            .unwrap_or(i64::from(DEFAULT_ZOOM));

        PreviewSettings::new(sandbox, presets, default_zoom)
    }

    fn normalize_doc(&mut self) {
        if !self.doc.is_table() {
            self.doc = Value::Table(Map::new());
        }

        {
            let app = self.ensure_table_mut("app");

            let port = app
                .get("server_port")
                .and_then(value_to_i64)
                .filter(|v| (1..=65_535).contains(v))
                .unwrap_or(DEFAULT_SERVER_PORT);
            app.insert("server_port".to_string(), Value::Integer(port));

            if app.get("placeholder_html").and_then(Value::as_str).is_none() {
                app.insert(
                    "placeholder_html".to_string(),
                    Value::String(DEFAULT_PLACEHOLDER_HTML.to_string()),
                );
            }
        }

        {
            let service = self.ensure_table_mut("service");

            let base_url = service
                .get("base_url")
                .and_then(Value::as_str)
                .and_then(|raw| match normalize_base_url(raw) {
                    Ok(url) => Some(url),
                    Err(err) => {
                        warn!("{err}; using {DEFAULT_SERVICE_BASE_URL}");
                        None
                    }
                })
                .unwrap_or_else(|| DEFAULT_SERVICE_BASE_URL.to_string());
            service.insert("base_url".to_string(), Value::String(base_url));

            let timeout = service
                .get("request_timeout_sec")
                .and_then(value_to_i64)
                .filter(|v| *v >= 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SEC);
            service.insert("request_timeout_sec".to_string(), Value::Integer(timeout));

            let max_bytes = service
                .get("max_image_bytes")
                .and_then(value_to_i64)
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_IMAGE_BYTES);
            service.insert("max_image_bytes".to_string(), Value::Integer(max_bytes));
        }

        let settings = self.preview_settings();
        {
            let preview = self.ensure_table_mut("preview");
            preview.insert(
                "sandbox".to_string(),
                Value::String(settings.sandbox.config_key().to_string()),
            );
            preview.insert(
                "zoom_presets".to_string(),
                Value::Array(
                    settings
                        .zoom_presets
                        .iter()
                        .map(|z| Value::Integer(i64::from(z.percent())))
                        .collect(),
                ),
            );
            preview.insert(
                "default_zoom".to_string(),
                Value::Integer(i64::from(settings.default_zoom.percent())),
            );
        }

        self.reorder_root_tables();
    }

    fn table(&self, name: &str) -> Option<&Map<String, Value>> {
        self.doc
            .as_table()
            .and_then(|root| root.get(name))
            .and_then(Value::as_table)
    }

    fn root_table_mut(&mut self) -> &mut Map<String, Value> {
        if !self.doc.is_table() {
            self.doc = Value::Table(Map::new());
        }
        self.doc
            .as_table_mut()
            .expect("root should be table after normalization")
    }

    fn ensure_table_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let root = self.root_table_mut();
        let table = root
            .entry(name.to_string())
            .or_insert_with(|| Value::Table(Map::new()));
        if !table.is_table() {
            *table = Value::Table(Map::new());
        }
        table
            .as_table_mut()
            .expect("table should exist after normalization")
    }

    fn reorder_root_tables(&mut self) {
        let root = self.root_table_mut();
        let mut reordered = Map::new();

        for key in ["app", "service", "preview"] {
            if let Some(value) = root.remove(key) {
                reordered.insert(key.to_string(), value);
            }
        }

        let remaining_keys: Vec<String> = root.keys().cloned().collect();
        for key in remaining_keys {
            if let Some(value) = root.remove(&key) {
                reordered.insert(key, value);
            }
        }

        *root = reordered;
    }
}

fn value_to_i64(value: &Value) -> Option<i64> {
    value
        .as_integer()
        .or_else(|| value.as_float().map(|v| v as i64))
        .or_else(|| value.as_str().and_then(|v| v.trim().parse::<i64>().ok()))
}
