//! Page perception - the injected discovery, accessible-name and render routine.
//!
//! The script installs itself once per document as a non-enumerable
//! `window.__cdpilot` object and evaluates to it, so every call below is a
//! single `Runtime.evaluate` whose return value carries the result back. If a
//! navigation wiped the injected state, the call re-installs it first.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::cdp::{self, Transport};
use crate::{Error, InteractiveElement, PageMetadata, Result, Snapshot};

/// The perception routine. Evaluates to its API object.
pub const PERCEPTION_JS: &str = include_str!("perception.js");

/// Build an expression calling `method` on the (re)installed perception API.
pub fn api_call(method: &str, args: &[serde_json::Value]) -> String {
    let args = args
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({}).{}({})", PERCEPTION_JS.trim(), method, args)
}

/// Inject the routine into the current document.
pub async fn install(transport: &dyn Transport) -> Result<()> {
    cdp::evaluate(transport, &format!("void {}", PERCEPTION_JS.trim())).await?;
    debug!("Perception script installed");
    Ok(())
}

/// Run discovery and rendering in one pass.
pub async fn snapshot(transport: &dyn Transport) -> Result<Snapshot> {
    let snap: Snapshot = cdp::evaluate_as(transport, &api_call("snapshot", &[])).await?;
    debug!(
        elements = snap.elements.len(),
        bytes = snap.text.len(),
        "Perception snapshot"
    );
    Ok(snap)
}

/// URL, title, ready-state, scroll offset and viewport size.
pub async fn metadata(transport: &dyn Transport) -> Result<PageMetadata> {
    cdp::evaluate_as(transport, &api_call("metadata", &[])).await
}

/// Outcome of resolving an index against a fresh discovery pass.
#[derive(Debug, Clone, Deserialize)]
pub struct Located {
    pub found: bool,
    /// Number of interactive elements discovered in that pass.
    pub count: usize,
    pub element: Option<InteractiveElement>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub focused: bool,
}

impl Located {
    /// The resolved element, or `ElementNotFound` naming the index.
    pub fn require(self, index: usize) -> Result<Located> {
        if self.found {
            Ok(self)
        } else {
            Err(Error::ElementNotFound {
                index,
                observed: self.count,
            })
        }
    }

    /// The described element, or a bare record for `index`.
    pub fn into_element(self, index: usize) -> InteractiveElement {
        self.element.unwrap_or(InteractiveElement {
            index,
            role: String::new(),
            name: String::new(),
        })
    }
}

/// Resolve `index` and smooth-scroll it to the viewport center.
pub async fn locate(transport: &dyn Transport, index: usize) -> Result<Located> {
    let located: Located =
        cdp::evaluate_as(transport, &api_call("locate", &[json!(index)])).await?;
    located.require(index)
}

/// Resolve `index` and measure its bounding-box center in viewport pixels.
pub async fn center(transport: &dyn Transport, index: usize) -> Result<Located> {
    let located: Located =
        cdp::evaluate_as(transport, &api_call("center", &[json!(index)])).await?;
    located.require(index)
}

/// Resolve `index` and move keyboard focus to it.
pub async fn focus(transport: &dyn Transport, index: usize) -> Result<Located> {
    let located: Located = cdp::evaluate_as(transport, &api_call("focus", &[json!(index)])).await?;
    located.require(index)
}

/// Fire a DOM click on whatever element sits under `(x, y)`.
pub async fn redispatch_click(transport: &dyn Transport, x: f64, y: f64) -> Result<bool> {
    cdp::evaluate_as(
        transport,
        &api_call("redispatchClick", &[json!(x), json!(y)]),
    )
    .await
}

/// Draw a short-lived marker at the click point.
pub async fn marker(transport: &dyn Transport, x: f64, y: f64, ms: u64) -> Result<()> {
    cdp::evaluate(
        transport,
        &api_call("marker", &[json!(x), json!(y), json!(ms)]),
    )
    .await?;
    Ok(())
}
