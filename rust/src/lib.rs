pub mod client;
pub mod config_store;
pub mod error;
pub mod launch;
pub mod main_ui_html;
pub mod path_utils;
pub mod preview;
pub mod server;
pub mod session;
