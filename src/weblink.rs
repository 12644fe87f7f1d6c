//! Outbound opener — builds source.chromium.org URLs and opens the browser.

use std::path::Path;

use anyhow::{Context as _, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::info;

use crate::config::BridgeConfig;
use crate::workspace;

/// Chromium code-search route for the main branch. The project-relative path
/// and `;l=<line>` fragment are appended directly.
pub const DEFAULT_VIEWER_BASE_URL: &str =
    "https://source.chromium.org/chromium/chromium/src/+/main:";

/// Origin of the default viewer — the single origin the inbound listener
/// accepts cross-origin requests from.
pub const DEFAULT_VIEWER_ORIGIN: &str = "https://source.chromium.org";

/// Characters escaped when embedding selected text as the `q=` search term.
/// Beyond controls, everything that would terminate or re-split the query
/// component gets encoded.
const SELECTION_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'=');

/// Build the viewer URL for a project-relative path and 1-based line.
///
/// A non-empty `selection` becomes a percent-encoded `?q=` search term; no
/// query string is emitted otherwise.
pub fn viewer_url(base: &str, relative: &Path, line: u32, selection: Option<&str>) -> String {
    let relative = relative.to_string_lossy().replace('\\', "/");
    let mut url = format!("{base}{relative};l={line}");
    if let Some(text) = selection.filter(|t| !t.is_empty()) {
        url.push_str("?q=");
        url.push_str(&utf8_percent_encode(text, SELECTION_ENCODE_SET).to_string());
    }
    url
}

/// Open `file` at `line` in the remote web viewer via the OS default browser.
///
/// Fails when `file` has no `src` component (no project-relative path can be
/// computed) or when the browser launch itself fails. Returns the URL that
/// was opened.
pub fn open_in_web(
    config: &BridgeConfig,
    file: &Path,
    line: u32,
    selection: Option<&str>,
) -> Result<String> {
    let relative = workspace::relative_after_marker(file).with_context(|| {
        format!(
            "'{}' is not inside a Chromium src checkout — cannot compute a viewer path",
            file.display()
        )
    })?;

    let url = viewer_url(&config.viewer_base_url, &relative, line, selection);
    webbrowser::open(&url).with_context(|| format!("could not open the browser for {url}"))?;
    info!(%url, "opened in web viewer");
    Ok(url)
}
