//! Session manager: one connection, one page, and the action surface on top.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, info, warn};

use crate::cdp::{self, CdpConnection, CdpEvent, Transport};
use crate::config::AgentConfig;
use crate::input::keys::KeyPress;
use crate::input::{pause, ClickCount, Keyboard, Mouse};
use crate::observation::{ObservationCache, PageInfo, PageInfoRequest};
use crate::perception;
use crate::{Error, InteractiveElement, PageMetadata, Result, Snapshot};

/// Domains enabled before any other command is issued.
const DOMAINS: [&str; 4] = ["Page", "DOM", "Runtime", "Network"];

/// Steps of a click-by-index action, logged as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionPhase {
    Idle,
    Resolving(usize),
    Scrolling,
    Settling,
    Clicking,
    Verifying,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPhase::Idle => write!(f, "idle"),
            ActionPhase::Resolving(index) => write!(f, "resolving [{}]", index),
            ActionPhase::Scrolling => write!(f, "scrolling"),
            ActionPhase::Settling => write!(f, "settling"),
            ActionPhase::Clicking => write!(f, "clicking"),
            ActionPhase::Verifying => write!(f, "verifying"),
        }
    }
}

fn enter(phase: ActionPhase) {
    debug!(%phase, "click by index");
}

/// Scroll targets for [`Session::scroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl ScrollDirection {
    fn script(self) -> &'static str {
        match self {
            ScrollDirection::Up => {
                "window.scrollBy({ top: -window.innerHeight * 0.8, behavior: 'smooth' })"
            }
            ScrollDirection::Down => {
                "window.scrollBy({ top: window.innerHeight * 0.8, behavior: 'smooth' })"
            }
            ScrollDirection::Top => "window.scrollTo({ top: 0, behavior: 'smooth' })",
            ScrollDirection::Bottom => {
                "window.scrollTo({ top: document.documentElement.scrollHeight, behavior: 'smooth' })"
            }
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "top" => Ok(ScrollDirection::Top),
            "bottom" => Ok(ScrollDirection::Bottom),
            other => Err(Error::InvalidArgument(format!(
                "unknown scroll direction {:?} (expected up, down, top or bottom)",
                other
            ))),
        }
    }
}

/// Page state after a navigation: metadata plus a fresh perception pass.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub metadata: PageMetadata,
    pub snapshot: Snapshot,
}

impl fmt::Display for NavigationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.metadata)?;
        writeln!(f)?;
        write!(f, "{}", self.snapshot.text)
    }
}

/// Which events end a navigation's wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadWait {
    /// Same-document navigation, nothing to wait for.
    None,
    /// A new document: wait for its load event.
    Load,
    /// History traversal: a load, a same-document change, or a bfcache restore.
    History,
}

impl LoadWait {
    fn is_done(self, event: &CdpEvent) -> bool {
        match self {
            LoadWait::None => true,
            LoadWait::Load => event.method == "Page.loadEventFired",
            LoadWait::History => match event.method.as_str() {
                "Page.loadEventFired" | "Page.navigatedWithinDocument" => true,
                "Page.frameNavigated" => {
                    event.params.get("type").and_then(Value::as_str)
                        == Some("BackForwardCacheRestore")
                }
                _ => false,
            },
        }
    }
}

/// A live browser session over one page target.
///
/// All actions go through one connection and run strictly in call order.
pub struct Session {
    transport: Option<Arc<dyn Transport>>,
    config: AgentConfig,
    elements: Vec<InteractiveElement>,
    observations: ObservationCache,
    /// Page events seen since the last command, checked for document loads.
    loads: Mutex<broadcast::Receiver<CdpEvent>>,
}

impl Session {
    /// Connect to the DevTools endpoint in `config` and prepare the page.
    pub async fn connect(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let conn = CdpConnection::connect(
            &config.connection.endpoint,
            Duration::from_millis(config.connection.connect_timeout_ms),
        )
        .await?;
        Self::with_transport(Arc::new(conn), config).await
    }

    /// Prepare a session over an existing transport: enable the protocol
    /// domains and inject the perception script. After every document load the
    /// script is injected again, ahead of the next command.
    pub async fn with_transport(transport: Arc<dyn Transport>, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let loads = Mutex::new(transport.subscribe());
        for domain in DOMAINS {
            transport
                .call(&format!("{}.enable", domain), json!({}))
                .await?;
        }
        perception::install(transport.as_ref()).await?;
        info!("Session ready");

        Ok(Self {
            transport: Some(transport),
            observations: ObservationCache::new(config.observation.clone()),
            config,
            elements: Vec::new(),
            loads,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Whether the session can still issue commands.
    pub fn is_ready(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport.clone().ok_or(Error::NotReady)
    }

    /// The transport, with the perception script re-injected first if a
    /// document has loaded since the last command.
    async fn page(&self) -> Result<Arc<dyn Transport>> {
        let transport = self.transport()?;
        if self.take_load() {
            if let Err(e) = perception::install(transport.as_ref()).await {
                warn!("Re-injecting perception script failed: {}", e);
            }
        }
        Ok(transport)
    }

    /// Drain pending page events, reporting whether any was a document load.
    fn take_load(&self) -> bool {
        let mut loads = self.loads.lock().unwrap_or_else(|e| e.into_inner());
        let mut loaded = false;
        loop {
            match loads.try_recv() {
                Ok(event) => loaded |= event.method == "Page.loadEventFired",
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Load listener lagged");
                    loaded = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return loaded,
            }
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Navigate to `url`, bounded by the navigation timeout, then perceive.
    pub async fn navigate(&mut self, url: &str) -> Result<NavigationResult> {
        info!("Navigating to {}", url);
        self.run_navigation(url, "Page.navigate", json!({ "url": url }), None)
            .await
    }

    /// Go back one history entry.
    pub async fn go_back(&mut self) -> Result<NavigationResult> {
        self.history_step(-1).await
    }

    /// Go forward one history entry.
    pub async fn go_forward(&mut self) -> Result<NavigationResult> {
        self.history_step(1).await
    }

    /// Reload the current document.
    pub async fn reload(&mut self) -> Result<NavigationResult> {
        let url = self.page_metadata().await?.url;
        self.run_navigation(&url, "Page.reload", json!({}), Some(LoadWait::Load))
            .await
    }

    async fn history_step(&mut self, delta: i64) -> Result<NavigationResult> {
        let transport = self.page().await?;
        let history = transport
            .call("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let entry = usize::try_from(current + delta)
            .ok()
            .and_then(|i| history.get("entries")?.as_array()?.get(i).cloned())
            .ok_or_else(|| {
                Error::Navigation(if delta < 0 {
                    "no previous history entry".into()
                } else {
                    "no next history entry".into()
                })
            })?;

        let url = entry
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("History navigation to {}", url);
        self.run_navigation(
            &url,
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry.get("id").cloned().unwrap_or(Value::Null) }),
            Some(LoadWait::History),
        )
        .await
    }

    /// Issue a navigation command and wait for it to settle, all under the
    /// navigation timeout. `wait` of `None` decides from the command's reply.
    async fn run_navigation(
        &mut self,
        url: &str,
        method: &str,
        params: Value,
        wait: Option<LoadWait>,
    ) -> Result<NavigationResult> {
        let transport = self.page().await?;
        self.elements.clear();
        let timeout_ms = self.config.navigation.timeout_ms;

        // Subscribe first so the load event cannot slip past
        let mut events = transport.subscribe();
        let settle = async {
            let reply = transport.call(method, params).await?;
            if let Some(err) = reply
                .get("errorText")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
            {
                return Err(Error::Navigation(format!("{}: {}", url, err)));
            }
            let wait = wait.unwrap_or(if reply.get("loaderId").is_some() {
                LoadWait::Load
            } else {
                LoadWait::None
            });
            wait_for(&mut events, wait).await
        };

        tokio::time::timeout(Duration::from_millis(timeout_ms), settle)
            .await
            .map_err(|_| Error::NavigationTimeout {
                url: url.to_string(),
                timeout_ms,
            })??;

        let transport = self.page().await?;
        let metadata = perception::metadata(transport.as_ref()).await?;
        let snapshot = self.perceive(transport.as_ref()).await?;
        self.observations.record(snapshot.text.clone());
        debug!(url = %metadata.url, elements = snapshot.elements.len(), "Navigation settled");
        Ok(NavigationResult { metadata, snapshot })
    }

    // =========================================================================
    // Perception
    // =========================================================================

    async fn perceive(&mut self, transport: &dyn Transport) -> Result<Snapshot> {
        let snapshot = perception::snapshot(transport).await?;
        self.elements = snapshot.elements.clone();
        Ok(snapshot)
    }

    /// Run discovery and rendering now. Does not touch the observation cache.
    pub async fn snapshot(&mut self) -> Result<Snapshot> {
        let transport = self.page().await?;
        self.perceive(transport.as_ref()).await
    }

    /// Chunked page text per the diff/paginate protocol.
    pub async fn get_page_info(&mut self, req: &PageInfoRequest) -> Result<PageInfo> {
        self.transport()?;
        if let Some(info) = self.observations.resume(req) {
            return Ok(info);
        }
        let transport = self.page().await?;
        let snapshot = self.perceive(transport.as_ref()).await?;
        self.observations.observe(snapshot.text, req)
    }

    /// URL, title, ready-state, scroll offset and viewport size.
    pub async fn page_metadata(&self) -> Result<PageMetadata> {
        let transport = self.page().await?;
        perception::metadata(transport.as_ref()).await
    }

    /// Elements from the most recent perception pass.
    pub fn elements(&self) -> &[InteractiveElement] {
        &self.elements
    }

    /// Compact `[index]{role}(name)` list, one per line.
    pub fn element_list(&self) -> String {
        crate::element_list(&self.elements)
    }

    /// PNG screenshot of the viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let transport = self.page().await?;
        let method = "Page.captureScreenshot";
        let reply = transport.call(method, json!({ "format": "png" })).await?;
        let data = reply
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol {
                method: method.into(),
                message: "reply has no image data".into(),
            })?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Protocol {
                method: method.into(),
                message: e.to_string(),
            })
    }

    // =========================================================================
    // Pointer
    // =========================================================================

    /// Click at viewport coordinates, then re-dispatch a DOM click on the
    /// element under the point and draw a short-lived marker.
    pub async fn click(&self, x: f64, y: f64) -> Result<()> {
        let transport = self.page().await?;
        let t = transport.as_ref();
        Mouse::new(t, &self.config.input)
            .click(x, y, ClickCount::Single)
            .await?;
        if perception::redispatch_click(t, x, y).await? {
            debug!(x, y, "DOM click re-dispatched");
        }
        perception::marker(t, x, y, self.config.input.click_marker_ms).await
    }

    /// Double-click at viewport coordinates.
    pub async fn double_click(&self, x: f64, y: f64) -> Result<()> {
        let transport = self.page().await?;
        Mouse::new(transport.as_ref(), &self.config.input)
            .click(x, y, ClickCount::Double)
            .await
    }

    /// Triple-click at viewport coordinates (selects a paragraph or field).
    pub async fn triple_click(&self, x: f64, y: f64) -> Result<()> {
        let transport = self.page().await?;
        Mouse::new(transport.as_ref(), &self.config.input)
            .click(x, y, ClickCount::Triple)
            .await
    }

    /// Resolve `index` against a fresh discovery pass, scroll it to the
    /// viewport center, and click its center.
    ///
    /// Fails with [`Error::ElementNotFound`] before any input is dispatched if
    /// the index is out of range.
    pub async fn click_element_by_index(&mut self, index: usize) -> Result<InteractiveElement> {
        let transport = self.page().await?;
        let t = transport.as_ref();

        enter(ActionPhase::Resolving(index));
        let located = perception::locate(t, index)
            .await
            .inspect_err(|_| enter(ActionPhase::Idle))?;

        enter(ActionPhase::Scrolling);
        enter(ActionPhase::Settling);
        pause(self.config.input.scroll_settle_ms).await;
        let target = perception::center(t, index)
            .await
            .inspect_err(|_| enter(ActionPhase::Idle))?;

        enter(ActionPhase::Clicking);
        self.click(target.x, target.y).await?;

        enter(ActionPhase::Verifying);
        let before = located.into_element(index);
        let after = target.into_element(index);
        if before != after {
            warn!(
                "Element [{}] changed while scrolling: {} -> {}",
                index, before, after
            );
        }
        enter(ActionPhase::Idle);
        Ok(after)
    }

    /// Resolve `index`, scroll it into view, and move keyboard focus to it.
    pub async fn focus_element_by_index(&mut self, index: usize) -> Result<InteractiveElement> {
        let transport = self.page().await?;
        let t = transport.as_ref();
        perception::locate(t, index).await?;
        pause(self.config.input.scroll_settle_ms).await;
        let focused = perception::focus(t, index).await?;
        if !focused.focused {
            warn!("Element [{}] did not take focus", index);
        }
        Ok(focused.into_element(index))
    }

    /// Resolve `index`, scroll it into view, and move the pointer onto it.
    pub async fn hover_element_by_index(&mut self, index: usize) -> Result<InteractiveElement> {
        let transport = self.page().await?;
        let t = transport.as_ref();
        perception::locate(t, index).await?;
        pause(self.config.input.scroll_settle_ms).await;
        let target = perception::center(t, index).await?;
        Mouse::new(t, &self.config.input)
            .approach(target.x, target.y)
            .await?;
        Ok(target.into_element(index))
    }

    /// Scroll the page and report where it ended up.
    pub async fn scroll(&self, direction: ScrollDirection) -> Result<PageMetadata> {
        let transport = self.page().await?;
        cdp::evaluate(transport.as_ref(), direction.script()).await?;
        pause(self.config.input.scroll_settle_ms).await;
        perception::metadata(transport.as_ref()).await
    }

    // =========================================================================
    // Keyboard
    // =========================================================================

    /// Type into the focused element. Accepts `{Enter}`-style key tokens.
    pub async fn type_text(&self, text: &str) -> Result<()> {
        let transport = self.page().await?;
        Keyboard::new(transport.as_ref(), &self.config.input)
            .type_text(text)
            .await
    }

    /// Press one key or combo, e.g. `Enter`, `{Tab}`, `Ctrl+a`.
    pub async fn press_key(&self, key: &str) -> Result<()> {
        let transport = self.page().await?;
        let name = key.trim();
        let name = name
            .strip_prefix('{')
            .and_then(|n| n.strip_suffix('}'))
            .unwrap_or(name);
        let press = KeyPress::parse(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown key {:?}", key)))?;
        Keyboard::new(transport.as_ref(), &self.config.input)
            .press(&press)
            .await
    }

    // =========================================================================
    // JavaScript
    // =========================================================================

    /// Evaluate `expression` in the page and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let transport = self.page().await?;
        cdp::evaluate(transport.as_ref(), expression).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drop the connection. Every later call fails with [`Error::NotReady`].
    pub async fn close(&mut self) -> Result<()> {
        self.elements.clear();
        self.observations.clear();
        if self.transport.take().is_some() {
            info!("Session closed");
        }
        Ok(())
    }
}

async fn wait_for(events: &mut broadcast::Receiver<CdpEvent>, wait: LoadWait) -> Result<()> {
    if wait == LoadWait::None {
        return Ok(());
    }
    loop {
        match events.recv().await {
            Ok(event) if wait.is_done(&event) => return Ok(()),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event stream lagged"),
            Err(RecvError::Closed) => {
                return Err(Error::Connection(
                    "event stream closed during navigation".into(),
                ))
            }
        }
    }
}
