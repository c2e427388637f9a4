use anyhow::{Context, Result};
use clap::Parser;
use image_html_editor::launch::{init_logging, start_server, Args};
use image_html_editor::server::AppServer;
use log::{debug, error, info};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use std::env;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::UI::WindowsAndMessaging::{
    ICON_BIG, ICON_SMALL, IMAGE_ICON, LR_DEFAULTSIZE, LR_LOADFROMFILE, LR_SHARED, LoadImageW,
    SendMessageW, WM_SETICON,
};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::windows::EventLoopBuilderExtWindows;
use winit::window::{Window, WindowId};
use wry::{WebView, WebViewBuilder};

const WINDOW_TITLE: &str = "HTML Editor";

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let server = start_server(&args)?;
    let event_loop = build_event_loop().context("failed to create event loop")?;

    let mut app = EditorWindow::new(server);
    event_loop
        .run_app(&mut app)
        .context("event loop terminated unexpectedly")?;

    Ok(())
}

/// Webview window hosting the editor page served by `AppServer`.
struct EditorWindow {
    url: String,
    window: Option<Window>,
    webview: Option<WebView>,
    server: Option<AppServer>,
    initial_size: LogicalSize<f64>,
}

impl EditorWindow {
    fn new(server: AppServer) -> Self {
        Self {
            url: server.url(),
            window: None,
            webview: None,
            server: Some(server),
            initial_size: LogicalSize::new(1280.0, 820.0),
        }
    }

    fn open(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }

        let attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(self.initial_size);
        let window = event_loop
            .create_window(attrs)
            .context("failed to create main window")?;
        set_window_icon(&window);

        let webview = WebViewBuilder::new()
            .with_url(&self.url)
            .build(&window)
            .context("failed to build webview")?;
        info!("editor window opened at {}", self.url);

        self.webview = Some(webview);
        self.window = Some(window);
        Ok(())
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.webview = None;
        self.window = None;
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for EditorWindow {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.open(event_loop) {
            error!("{err:#}");
            self.close(event_loop);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.close(event_loop),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                debug!("window scale factor changed to {scale_factor:.4}");
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}

fn build_event_loop() -> Result<EventLoop<()>> {
    let mut builder = EventLoop::builder();
    // DPI awareness comes from the embedded manifest.
    builder.with_dpi_aware(false);
    builder.build().map_err(Into::into)
}

fn set_window_icon(window: &Window) {
    let Some(hwnd) = hwnd_from_window(window) else {
        debug!("window icon skipped: no Win32 handle");
        return;
    };

    let Some(icon) = load_icon_from_resource().or_else(load_icon_from_file) else {
        debug!("window icon skipped: no embedded resource or app.ico");
        return;
    };

    unsafe {
        SendMessageW(hwnd, WM_SETICON, ICON_BIG as usize, icon);
        SendMessageW(hwnd, WM_SETICON, ICON_SMALL as usize, icon);
    }
}

fn hwnd_from_window(window: &Window) -> Option<*mut core::ffi::c_void> {
    let handle = window.window_handle().ok()?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Some(win32.hwnd.get() as *mut core::ffi::c_void),
        _ => None,
    }
}

fn load_icon_from_resource() -> Option<isize> {
    let module = unsafe { GetModuleHandleW(core::ptr::null()) };
    if module.is_null() {
        return None;
    }

    // winres embeds the icon as resource id 1.
    let handle = unsafe {
        LoadImageW(
            module,
            1usize as *const u16,
            IMAGE_ICON,
            0,
            0,
            LR_DEFAULTSIZE | LR_SHARED,
        )
    };
    (!handle.is_null()).then_some(handle as isize)
}

fn load_icon_from_file() -> Option<isize> {
    let path = icon_candidates().into_iter().find(|path| path.is_file())?;
    debug!("loading window icon from {}", path.display());
    let wide = to_wide_null(&path);

    let handle = unsafe {
        LoadImageW(
            core::ptr::null_mut(),
            wide.as_ptr(),
            IMAGE_ICON,
            0,
            0,
            LR_LOADFROMFILE | LR_DEFAULTSIZE | LR_SHARED,
        )
    };
    (!handle.is_null()).then_some(handle as isize)
}

fn icon_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("app.ico"));
        candidates.push(exe_dir.join("assets").join("app.ico"));
    }
    candidates.push(PathBuf::from("assets").join("app.ico"));
    candidates
}

fn to_wide_null(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
