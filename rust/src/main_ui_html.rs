use html_escape::encode_text;
use serde_json::json;

use crate::preview::PreviewSettings;
use crate::session::{GENERATE_FAILED_MESSAGE, SAVE_FAILED_MESSAGE, SAVE_SUCCEEDED_MESSAGE};

pub fn build_main_ui_html(preview: &PreviewSettings, document: &str) -> String {
    let messages = json!({
        "generateFailed": GENERATE_FAILED_MESSAGE,
        "saveFailed": SAVE_FAILED_MESSAGE,
        "saveSucceeded": SAVE_SUCCEEDED_MESSAGE,
    });

    fill_template(
        MAIN_UI_HTML,
        &[
            ("ZOOM_OPTIONS", preview.zoom_options_html()),
            ("PREVIEW_FRAME", preview.frame_html(document)),
            ("EDITOR_TEXT", encode_text(document).into_owned()),
            ("MESSAGES", messages.to_string()),
            ("ZOOM_PRESETS", json!(preview.zoom_percents()).to_string()),
        ],
    )
}

/// Single pass over `template`; substituted values are never rescanned, so a
/// document containing `{{...}}` is inserted as-is.
fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

const MAIN_UI_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>HTML Editor</title>
  <style>
    :root {
      --bg: #1f2024;
      --panel: #1b1c20;
      --line: #3f4248;
      --input-bg: #272a2f;
      --input-line: #4a4e55;
      --text: #f3f5f7;
      --muted: #9ca2ad;
      --btn-bg: #2a2d33;
      --btn-line: #5b616d;
      --font-sm: 12px;
    }
    * { box-sizing: border-box; }
    body {
      margin: 0;
      color: var(--text);
      background: var(--bg);
      font-family: "Segoe UI", "Helvetica Neue", sans-serif;
      font-size: 14px;
    }
    .wrap {
      height: 100vh;
      display: flex;
      flex-direction: column;
      padding: 6px;
      gap: 6px;
    }
    header {
      display: flex;
      align-items: center;
      gap: 10px;
      border: 1px solid var(--line);
      background: var(--panel);
      padding: 6px 10px;
    }
    header h1 {
      margin: 0 12px 0 0;
      font-size: 16px;
      font-weight: 600;
    }
    .busy {
      color: var(--muted);
      font-size: var(--font-sm);
    }
    .panes {
      flex: 1 1 auto;
      min-height: 0;
      display: flex;
      gap: 6px;
    }
    .pane {
      flex: 1 1 50%;
      min-width: 0;
      display: flex;
      flex-direction: column;
      border: 1px solid var(--line);
      background: var(--panel);
    }
    .pane-head {
      display: flex;
      justify-content: space-between;
      align-items: center;
      gap: 6px;
      padding: 4px 8px;
      border-bottom: 1px solid #2f3137;
    }
    .pane-head h2 {
      margin: 0;
      font-size: 13px;
      font-weight: 600;
    }
    .pane-tools {
      display: flex;
      gap: 6px;
      align-items: center;
    }
    .preview-body {
      flex: 1 1 auto;
      min-height: 0;
      overflow: auto;
      background: #ffffff;
    }
    #previewFrame {
      border: 0;
      display: block;
      background: #ffffff;
    }
    textarea {
      flex: 1 1 auto;
      min-height: 0;
      resize: none;
      border: 0;
      outline: none;
      padding: 8px 10px;
      color: var(--text);
      background: var(--input-bg);
      font-family: Consolas, "SFMono-Regular", monospace;
      font-size: 13px;
      line-height: 1.4;
    }
    select {
      height: 26px;
      border: 1px solid var(--input-line);
      background: var(--input-bg);
      color: var(--text);
      border-radius: 4px;
      font-size: var(--font-sm);
    }
    .btn {
      min-width: 80px;
      height: 28px;
      border: 1px solid var(--btn-line);
      background: var(--btn-bg);
      color: #ffffff;
      border-radius: 5px;
      font-weight: 500;
      padding: 0 10px;
      cursor: pointer;
      font-size: 12px;
    }
    .btn:hover {
      background: #343842;
    }
    .btn:disabled {
      opacity: 0.45;
      cursor: default;
    }
    .status {
      min-height: 16px;
      color: var(--muted);
      font-size: 11px;
    }
  </style>
</head>
<body>
  <main class="wrap">
    <header>
      <h1>HTML Editor</h1>
      <input id="fileInput" type="file" accept="image/*" hidden />
      <button id="upload" class="btn">Upload Image</button>
      <span id="busy" class="busy" hidden>Processing...</span>
    </header>
    <section class="panes">
      <section class="pane">
        <div class="pane-head">
          <h2>Preview</h2>
          <div class="pane-tools">
            <select id="zoom" title="Zoom">{{ZOOM_OPTIONS}}</select>
            <button id="save" class="btn">Save HTML</button>
          </div>
        </div>
        <div class="preview-body">{{PREVIEW_FRAME}}</div>
      </section>
      <section class="pane">
        <div class="pane-head">
          <h2>HTML Editor</h2>
        </div>
        <textarea id="editor" spellcheck="false">{{EDITOR_TEXT}}</textarea>
      </section>
    </section>
    <div id="status" class="status"></div>
  </main>

  <script>
    const MESSAGES = {{MESSAGES}};
    const ZOOM_PRESETS = {{ZOOM_PRESETS}};
    const BUSY_POLL_MS = 1000;
    const state = {
      document: document.getElementById("editor").value,
      revision: 0,
      busy: false,
      dirty: false,
    };
    let editQueue = Promise.resolve();
    let busyPoll = null;

    const uploadButton = document.getElementById("upload");
    const fileInput = document.getElementById("fileInput");
    const busyText = document.getElementById("busy");
    const editor = document.getElementById("editor");
    const frame = document.getElementById("previewFrame");
    const zoom = document.getElementById("zoom");

    function setStatus(message) {
      document.getElementById("status").textContent = message || "";
    }

    function setBusy(busy) {
      state.busy = busy;
      uploadButton.disabled = busy;
      busyText.hidden = !busy;
    }

    async function readJson(res) {
      let data = {};
      try {
        data = await res.json();
      } catch (err) {
        data = {};
      }
      if (!res.ok || !data.ok) {
        throw new Error(data.error || "request failed");
      }
      return data;
    }

    async function apiGet(path) {
      const res = await fetch(path, { method: "GET" });
      return readJson(res);
    }

    async function apiPost(path, body) {
      const res = await fetch(path, {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify(body || {}),
      });
      return readJson(res);
    }

    async function apiUpload(path, formData) {
      const res = await fetch(path, { method: "POST", body: formData });
      return readJson(res);
    }

    function renderPreview() {
      frame.srcdoc = state.document;
    }

    function applyZoom(percent) {
      if (!ZOOM_PRESETS.includes(percent)) {
        return;
      }
      const scale = percent / 100;
      const inverse = (100 / scale).toFixed(4);
      frame.style.transform = `scale(${scale})`;
      frame.style.transformOrigin = "0 0";
      frame.style.width = `${inverse}%`;
      frame.style.height = `${inverse}%`;
    }

    function showSaved(payload) {
      if (payload.last_saved_at) {
        setStatus(`Last saved ${payload.last_saved_at}`);
      }
    }

    function noteRevision(payload) {
      state.revision = Math.max(state.revision, payload.revision || 0);
    }

    function applySnapshot(payload) {
      noteRevision(payload);
      state.document = payload.document || "";
      editor.value = state.document;
      renderPreview();
      showSaved(payload);
    }

    function queueEdit(html) {
      editQueue = editQueue
        .then(() => apiPost("/app/edit", { html }))
        .then((data) => {
          noteRevision(data);
          setStatus("");
        })
        .catch((err) => {
          console.error("Failed to update document", err);
          setStatus(`Edit not synced: ${err.message}`);
        });
      return editQueue;
    }

    // Generated HTML replaces local edits. An edit still queued when the
    // result arrived lands on the server after it, so the result is sent again.
    async function takeGenerated(data) {
      await editQueue;
      const overtaken = state.revision > (data.revision || 0);
      applySnapshot(data);
      state.dirty = false;
      if (overtaken) {
        queueEdit(state.document);
      }
    }

    // A generation started before this page loaded answers the old page.
    function watchBusy() {
      if (busyPoll === null) {
        busyPoll = setTimeout(pollBusy, BUSY_POLL_MS);
      }
    }

    async function pollBusy() {
      busyPoll = null;
      try {
        const data = await apiGet("/app/init");
        if (data.busy) {
          watchBusy();
          return;
        }
        await takeGenerated(data);
        setBusy(false);
      } catch (err) {
        setStatus(`Status check failed: ${err.message}`);
        watchBusy();
      }
    }

    uploadButton.addEventListener("click", () => {
      if (state.busy) {
        return;
      }
      fileInput.click();
    });

    fileInput.addEventListener("change", async () => {
      const files = fileInput.files;
      if (!files || files.length === 0) {
        return;
      }
      const formData = new FormData();
      formData.append("image", files[0]);
      fileInput.value = "";

      setBusy(true);
      try {
        const data = await apiUpload("/app/upload", formData);
        await takeGenerated(data);
      } catch (err) {
        console.error("Failed to generate HTML", err);
        alert(MESSAGES.generateFailed);
      } finally {
        setBusy(false);
      }
    });

    editor.addEventListener("input", () => {
      state.dirty = true;
      state.document = editor.value;
      renderPreview();
      queueEdit(state.document);
    });

    zoom.addEventListener("change", () => {
      applyZoom(Number(zoom.value));
    });

    document.getElementById("save").addEventListener("click", async () => {
      try {
        await editQueue;
        const data = await apiPost("/app/save", { html: state.document });
        noteRevision(data);
        showSaved(data);
        alert(MESSAGES.saveSucceeded);
      } catch (err) {
        console.error("Failed to save HTML", err);
        alert(MESSAGES.saveFailed);
      }
    });

    async function init() {
      try {
        const data = await apiGet("/app/init");
        if (state.dirty) {
          showSaved(data);
        } else {
          applySnapshot(data);
        }
        if (data.busy) {
          setBusy(true);
          watchBusy();
        }
      } catch (err) {
        setStatus(`Startup error: ${err.message}`);
      }
    }

    init();
  </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_inlines_escaped_document_and_settings() {
        let html = build_main_ui_html(&PreviewSettings::default(), "<b>A & B</b>");
        assert!(html.contains(r#"<textarea id="editor" spellcheck="false">&lt;b&gt;A &amp; B&lt;/b&gt;</textarea>"#));
        assert!(html.contains(r#"sandbox="allow-scripts""#));
        assert!(html.contains(r#"accept="image/*""#));
        assert!(html.contains(r#"<option value="125">125%</option>"#));
        assert!(html.contains(GENERATE_FAILED_MESSAGE));
        assert!(!html.contains("{{"));
    }

    /// Text of the page script from `start` up to the next block closing at
    /// script indentation.
    fn script_block<'a>(html: &'a str, start: &str) -> &'a str {
        let from = html.find(start).expect("script block");
        let rest = &html[from..];
        let end = rest.find("\n    }").expect("block end");
        &rest[..end]
    }

    #[test]
    fn zoom_only_restyles_the_frame() {
        let html = build_main_ui_html(&PreviewSettings::default(), "<p>x</p>");
        assert!(html.contains("const ZOOM_PRESETS = [50,75,100,125];"));

        let apply = script_block(&html, "function applyZoom(");
        assert!(apply.contains("ZOOM_PRESETS.includes(percent)"));
        assert!(apply.contains("frame.style.transform"));
        for forbidden in ["fetch", "apiPost", "apiGet", "srcdoc", "state.document", "editor"] {
            assert!(!apply.contains(forbidden), "applyZoom touches {forbidden}");
        }

        let handler = script_block(&html, r#"zoom.addEventListener("change""#);
        assert!(handler.contains("applyZoom(Number(zoom.value))"));
        assert!(!handler.contains("fetch"));
        assert!(!handler.contains("state.document"));
    }

    #[test]
    fn save_sends_the_text_the_editor_shows() {
        let html = build_main_ui_html(&PreviewSettings::default(), "");
        let handler = script_block(&html, r#"getElementById("save").addEventListener"#);
        assert!(handler.contains("await editQueue;"));
        assert!(handler.contains(r#"apiPost("/app/save", { html: state.document })"#));
    }

    #[test]
    fn late_init_keeps_local_typing() {
        let html = build_main_ui_html(&PreviewSettings::default(), "");
        let init = script_block(&html, "async function init(");
        assert!(init.contains("if (state.dirty)"));
        let input = script_block(&html, r#"editor.addEventListener("input""#);
        assert!(input.contains("state.dirty = true;"));
    }

    #[test]
    fn reload_during_generation_polls_until_idle() {
        let html = build_main_ui_html(&PreviewSettings::default(), "");
        let init = script_block(&html, "async function init(");
        assert!(init.contains("watchBusy();"));

        let poll = script_block(&html, "async function pollBusy(");
        assert!(poll.contains(r#"apiGet("/app/init")"#));
        assert!(poll.contains("setBusy(false);"));
    }

    #[test]
    fn template_values_are_not_rescanned() {
        let out = fill_template(
            "[{{A}}|{{B}}|{{C}}]",
            &[("A", "{{B}}".to_string()), ("B", "b".to_string())],
        );
        assert_eq!(out, "[{{B}}|b|{{C}}]");
    }

    #[test]
    fn document_with_braces_survives_page_build() {
        let html = build_main_ui_html(&PreviewSettings::default(), "{{MESSAGES}}");
        assert!(html.contains(r#"spellcheck="false">{{MESSAGES}}</textarea>"#));
    }
}
