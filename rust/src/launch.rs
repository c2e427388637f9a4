use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use crate::client::HttpHtmlService;
use crate::config_store::ConfigStore;
use crate::path_utils::{get_base_dir, resolve_config_path};
use crate::server::{AppServer, AppState};
use crate::session::EditorSession;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "image_html_editor", about = "Turn an image into editable HTML")]
pub struct Args {
    /// Path to config.toml (created with defaults when missing)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Preferred local port for the editor UI
    #[arg(long)]
    pub port: Option<u16>,

    /// Base URL of the HTML generation service
    #[arg(long)]
    pub base_url: Option<String>,
}

pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Loads configuration, wires the service client into a fresh editor
/// session and starts the local UI server.
pub fn start_server(args: &Args) -> Result<AppServer> {
    let base_dir = get_base_dir();
    let config_path = resolve_config_path(args.config.clone(), &base_dir);
    let config = ConfigStore::new(config_path.clone())
        .with_context(|| format!("config error: {}", config_path.display()))?;
    info!("using config {}", config.path().display());

    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| config.service_base_url());
    let service = HttpHtmlService::new(&base_url, config.request_timeout())
        .with_context(|| format!("invalid generation service url: {base_url}"))?;
    info!(
        "generation service: {} (save: {})",
        service.generate_url(),
        service.save_url()
    );

    let state = Arc::new(AppState::new(
        EditorSession::new(config.placeholder_html()),
        Arc::new(service),
        config.preview_settings(),
        config.max_image_bytes(),
    ));

    let preferred_port = args.port.unwrap_or_else(|| config.server_port());
    AppServer::start(state, preferred_port).context("failed to start editor server")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::parse_from([
            "image_html_editor",
            "--config",
            "conf/app.toml",
            "--port",
            "4100",
            "--base-url",
            "http://gen.local:9000",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("conf/app.toml")));
        assert_eq!(args.port, Some(4100));
        assert_eq!(args.base_url.as_deref(), Some("http://gen.local:9000"));
    }

    #[tokio::test]
    async fn starts_server_from_fresh_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = Args {
            config: Some(dir.path().join("config.toml")),
            port: Some(0),
            base_url: Some("http://127.0.0.1:9".to_string()),
        };

        let server = start_server(&args).expect("start");
        let body: serde_json::Value = reqwest::get(format!("{}app/init", server.url()))
            .await
            .expect("send")
            .json()
            .await
            .expect("json");
        assert_eq!(body["ok"], true);
        assert_eq!(body["busy"], false);
        assert!(dir.path().join("config.toml").exists());
    }
}
