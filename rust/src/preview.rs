use html_escape::{encode_double_quoted_attribute, encode_text};
use log::warn;

pub const DEFAULT_ZOOM_PRESETS: [u16; 4] = [50, 75, 100, 125];
pub const DEFAULT_ZOOM: u16 = 100;
pub const MIN_ZOOM: u16 = 10;
pub const MAX_ZOOM: u16 = 400;

/// Capability set granted to the preview frame.
///
/// Generated or edited markup is untrusted. `ScriptsOnly` keeps the frame on an
/// opaque origin so it cannot reach the host page's cookies, storage or DOM;
/// `ScriptsAndSameOrigin` lifts that isolation and has to be opted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxPolicy {
    #[default]
    ScriptsOnly,
    ScriptsAndSameOrigin,
}

impl SandboxPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scripts" | "allow-scripts" => Some(Self::ScriptsOnly),
            "scripts-same-origin" | "allow-scripts allow-same-origin" => {
                Some(Self::ScriptsAndSameOrigin)
            }
            _ => None,
        }
    }

    pub fn from_config(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!("unknown preview sandbox policy {raw:?}; using \"scripts\"");
            Self::default()
        })
    }

    pub fn config_key(self) -> &'static str {
        match self {
            Self::ScriptsOnly => "scripts",
            Self::ScriptsAndSameOrigin => "scripts-same-origin",
        }
    }

    /// Value of the iframe `sandbox` attribute.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::ScriptsOnly => "allow-scripts",
            Self::ScriptsAndSameOrigin => "allow-scripts allow-same-origin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZoomLevel(u16);

impl ZoomLevel {
    pub fn new(percent: u16) -> Option<Self> {
        (MIN_ZOOM..=MAX_ZOOM).contains(&percent).then_some(Self(percent))
    }

    pub fn percent(self) -> u16 {
        self.0
    }

    pub fn scale(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Inline style for the preview frame. The frame box is enlarged by the
    /// inverse scale so the scaled document still fills the pane.
    pub fn frame_style(self) -> String {
        let inverse = 100.0 / self.scale();
        format!(
            "transform: scale({}); transform-origin: 0 0; width: {inverse:.4}%; height: {inverse:.4}%;",
            self.scale()
        )
    }

    pub fn label(self) -> String {
        format!("{}%", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    pub sandbox: SandboxPolicy,
    pub zoom_presets: Vec<ZoomLevel>,
    pub default_zoom: ZoomLevel,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self::new(
            SandboxPolicy::default(),
            DEFAULT_ZOOM_PRESETS.iter().map(|v| i64::from(*v)),
            i64::from(DEFAULT_ZOOM),
        )
    }
}

impl PreviewSettings {
    pub fn new(
        sandbox: SandboxPolicy,
        presets: impl IntoIterator<Item = i64>,
        default_zoom: i64,
    ) -> Self {
        let zoom_presets = normalize_zoom_presets(presets);
        let default_zoom = u16::try_from(default_zoom)
            .ok()
            .and_then(ZoomLevel::new)
            .filter(|zoom| zoom_presets.contains(zoom))
            .or_else(|| ZoomLevel::new(DEFAULT_ZOOM).filter(|z| zoom_presets.contains(z)))
            .unwrap_or(zoom_presets[0]);

        Self {
            sandbox,
            zoom_presets,
            default_zoom,
        }
    }

    /// Preset percentages in display order; the page accepts no other zoom.
    pub fn zoom_percents(&self) -> Vec<u16> {
        self.zoom_presets.iter().map(|zoom| zoom.percent()).collect()
    }

    pub fn zoom_options_html(&self) -> String {
        self.zoom_presets
            .iter()
            .map(|zoom| {
                let selected = if *zoom == self.default_zoom {
                    " selected"
                } else {
                    ""
                };
                format!(
                    r#"<option value="{}"{selected}>{}</option>"#,
                    zoom.percent(),
                    encode_text(&zoom.label())
                )
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn frame_html(&self, document: &str) -> String {
        format!(
            r#"<iframe id="previewFrame" title="HTML Preview" sandbox="{}" style="{}" srcdoc="{}"></iframe>"#,
            self.sandbox.attribute(),
            self.default_zoom.frame_style(),
            encode_double_quoted_attribute(document)
        )
    }
}

/// Deduplicated, sorted presets inside `MIN_ZOOM..=MAX_ZOOM`. Never empty.
pub fn normalize_zoom_presets(raw: impl IntoIterator<Item = i64>) -> Vec<ZoomLevel> {
    let mut presets: Vec<ZoomLevel> = raw
        .into_iter()
        .filter_map(|v| u16::try_from(v).ok())
        .filter_map(ZoomLevel::new)
        .collect();
    presets.sort();
    presets.dedup();

    if presets.is_empty() {
        presets = DEFAULT_ZOOM_PRESETS
            .iter()
            .copied()
            .filter_map(ZoomLevel::new)
            .collect();
    }
    presets
}
