//! # cdpilot-agent
//!
//! Browser control and page perception over the Chrome DevTools Protocol.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cdpilot_agent::{AgentConfig, PageInfoRequest, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> cdpilot_agent::Result<()> {
//! // Chrome must already be running with --remote-debugging-port=9222
//! let mut session = Session::connect(AgentConfig::default()).await?;
//! let nav = session.navigate("https://example.com").await?;
//! println!("{}", nav);
//!
//! // Act by index, then ask only for what changed
//! session.click_element_by_index(0).await?;
//! let info = session.get_page_info(&PageInfoRequest::default()).await?;
//! println!("{}", info);
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Element indices come from the most recent perception pass. They are not
//! stable across DOM mutations: re-query the page after any action that may
//! change it before trusting an index again.

pub mod cdp;
pub mod config;
pub mod input;
pub mod observation;
pub mod perception;
pub mod session;

use std::fmt;

use serde::Deserialize;

pub use cdp::{CdpConnection, CdpEvent, Transport};
pub use config::{AgentConfig, ConnectionConfig, InputConfig, NavigationConfig, ObservationConfig};
pub use input::keys::{parse_keys, KeyPress, KeySegment};
pub use observation::{ObservationCache, PageChunk, PageInfo, PageInfoRequest, Source};
pub use session::{NavigationResult, ScrollDirection, Session};

/// Result type for cdpilot-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the browser.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("session not ready: protocol domains are not enabled or the session is closed")]
    NotReady,

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element [{index}] not found (discovered {observed} elements - re-query the page)")]
    ElementNotFound { index: usize, observed: usize },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("protocol error in {method}: {message}")]
    Protocol { method: String, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// An interactive element found by the perception script, identified by index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InteractiveElement {
    /// Zero-based index in discovery order (valid until the DOM changes)
    pub index: usize,
    /// Declared ARIA role, or the lowercase tag name
    pub role: String,
    /// Resolved accessible name, may be empty
    pub name: String,
}

impl fmt::Display for InteractiveElement {
    /// Same token the page-text renderer emits: `[index]{role}(name)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{{{}}}({})", self.index, self.role, self.name)
    }
}

/// One discovery + render pass over the live document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    pub elements: Vec<InteractiveElement>,
    pub text: String,
}

impl Snapshot {
    /// Compact element list, one `[index]{role}(name)` token per line.
    pub fn element_list(&self) -> String {
        element_list(&self.elements)
    }
}

pub(crate) fn element_list(elements: &[InteractiveElement]) -> String {
    let mut out = String::with_capacity(elements.len() * 32);
    for el in elements {
        out.push_str(&el.to_string());
        out.push('\n');
    }
    out
}

/// Primitive page state reported alongside navigation results.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub url: String,
    pub title: String,
    pub ready_state: String,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl fmt::Display for PageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "URL: {}", self.url)?;
        writeln!(f, "Title: {}", self.title)?;
        write!(
            f,
            "Ready state: {} | Scroll: ({}, {}) | Viewport: {}x{}",
            self.ready_state,
            self.scroll_x.round(),
            self.scroll_y.round(),
            self.viewport_width.round(),
            self.viewport_height.round()
        )
    }
}
