#![cfg_attr(
    all(target_os = "windows", not(debug_assertions)),
    windows_subsystem = "windows"
)]

#[cfg(target_os = "windows")]
mod windows_app;

#[cfg(target_os = "windows")]
fn main() -> anyhow::Result<()> {
    windows_app::run()
}

#[cfg(not(target_os = "windows"))]
fn main() -> anyhow::Result<()> {
    use clap::Parser;
    use image_html_editor::launch::{init_logging, start_server, Args};

    let args = Args::parse();
    init_logging();

    let mut server = start_server(&args)?;
    println!("HTML Editor running at {}", server.url());
    server.wait();
    Ok(())
}
