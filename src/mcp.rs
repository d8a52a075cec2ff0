use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use cdpilot_agent::{AgentConfig, PageInfoRequest, ScrollDirection, Session};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NavigateRequest {
    #[schemars(description = "URL to navigate to")]
    pub url: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PointRequest {
    #[schemars(description = "Viewport x coordinate in CSS pixels")]
    pub x: f64,
    #[schemars(description = "Viewport y coordinate in CSS pixels")]
    pub y: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IndexRequest {
    #[schemars(description = "Element index from the latest page text or element list")]
    pub index: usize,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TypeTextRequest {
    #[schemars(
        description = "Text to type into the focused element. Special keys as {Enter}, {Tab}, {Backspace}, {ArrowDown}, {Ctrl+a}"
    )]
    pub text: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PressKeyRequest {
    #[schemars(description = "Key or combo to press (e.g. Enter, Escape, ArrowDown, Ctrl+a)")]
    pub key: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ScrollRequest {
    #[schemars(description = "Direction: up, down, top, or bottom")]
    pub direction: String,
}

#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct PageInfoParams {
    #[schemars(description = "Return the full page text even if a diff is available")]
    pub force: Option<bool>,
    #[schemars(description = "Cursor from a previous [NEXT CURSOR: n] marker")]
    pub cursor: Option<usize>,
    #[schemars(description = "Number of pages to return in this response (default 1)")]
    pub remaining_pages: Option<usize>,
    #[schemars(description = "Only return context around case-insensitive matches of this term")]
    pub search: Option<String>,
    #[schemars(description = "Jump to this percentage (0-100) of the full page text")]
    pub percent: Option<f64>,
}

impl From<PageInfoParams> for PageInfoRequest {
    fn from(p: PageInfoParams) -> Self {
        PageInfoRequest {
            force: p.force.unwrap_or(false),
            cursor: p.cursor.unwrap_or(0),
            remaining_pages: p.remaining_pages.unwrap_or(1).max(1),
            search: p.search,
            percent: p.percent,
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct EvaluateRequest {
    #[schemars(description = "JavaScript expression evaluated in the page; the result is returned as JSON")]
    pub expression: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn no_session() -> ErrorData {
    ErrorData::internal_error("No browser session. Use navigate first.", None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

#[derive(Clone)]
pub struct CdpilotServer {
    config: AgentConfig,
    session: Arc<Mutex<Option<Session>>>,
    tool_router: ToolRouter<Self>,
}

impl CdpilotServer {
    /// Lock the session, connecting on first use.
    async fn connected(&self) -> Result<MutexGuard<'_, Option<Session>>, ErrorData> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            info!("Connecting to {}", self.config.connection.endpoint);
            let session = Session::connect(self.config.clone()).await.map_err(err)?;
            *guard = Some(session);
        }
        Ok(guard)
    }
}

#[tool_router]
impl CdpilotServer {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Navigate to a URL and return page metadata plus the full page text. Connects to the browser on first call."
    )]
    async fn navigate(
        &self,
        req: Parameters<NavigateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let nav = session.navigate(&req.0.url).await.map_err(err)?;
        text_ok(format!("Navigated to {}\n{}", req.0.url, nav))
    }

    #[tool(description = "Click at viewport coordinates.")]
    async fn click(&self, req: Parameters<PointRequest>) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        session.click(req.0.x, req.0.y).await.map_err(err)?;
        text_ok(format!("Clicked at ({}, {})", req.0.x, req.0.y))
    }

    #[tool(description = "Double-click at viewport coordinates.")]
    async fn double_click(
        &self,
        req: Parameters<PointRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        session.double_click(req.0.x, req.0.y).await.map_err(err)?;
        text_ok(format!("Double-clicked at ({}, {})", req.0.x, req.0.y))
    }

    #[tool(description = "Triple-click at viewport coordinates (selects a line or field).")]
    async fn triple_click(
        &self,
        req: Parameters<PointRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        session.triple_click(req.0.x, req.0.y).await.map_err(err)?;
        text_ok(format!("Triple-clicked at ({}, {})", req.0.x, req.0.y))
    }

    #[tool(
        description = "Click an element by index. Scrolls it into view first. Indices go stale after the page changes: re-read the page before reusing one."
    )]
    async fn click_element(
        &self,
        req: Parameters<IndexRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let el = session
            .click_element_by_index(req.0.index)
            .await
            .map_err(err)?;
        text_ok(format!("Clicked {}", el))
    }

    #[tool(description = "Move keyboard focus to an element by index.")]
    async fn focus_element(
        &self,
        req: Parameters<IndexRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let el = session
            .focus_element_by_index(req.0.index)
            .await
            .map_err(err)?;
        text_ok(format!("Focused {}", el))
    }

    #[tool(
        description = "Hover over an element by index to trigger hover states, tooltips, or menus."
    )]
    async fn hover_element(
        &self,
        req: Parameters<IndexRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let el = session
            .hover_element_by_index(req.0.index)
            .await
            .map_err(err)?;
        text_ok(format!("Hovered {}", el))
    }

    #[tool(
        description = "Type text into the focused element with human-like timing. Supports {Enter}, {Tab}, {Backspace}, arrow keys and {Ctrl+<letter>}."
    )]
    async fn type_text(
        &self,
        req: Parameters<TypeTextRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        session.type_text(&req.0.text).await.map_err(err)?;
        text_ok(format!("Typed \"{}\"", req.0.text))
    }

    #[tool(description = "Press a key or combo (e.g. Enter, Tab, Escape, ArrowDown, Ctrl+a).")]
    async fn press_key(
        &self,
        req: Parameters<PressKeyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        session.press_key(&req.0.key).await.map_err(err)?;
        text_ok(format!("Pressed {}", req.0.key))
    }

    #[tool(description = "Scroll the page: 'up', 'down', 'top' or 'bottom'.")]
    async fn scroll(&self, req: Parameters<ScrollRequest>) -> Result<CallToolResult, ErrorData> {
        let direction: ScrollDirection = req
            .0
            .direction
            .parse()
            .map_err(|e: cdpilot_agent::Error| ErrorData::invalid_params(e.to_string(), None::<Value>))?;
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        let meta = session.scroll(direction).await.map_err(err)?;
        text_ok(format!("Scrolled {}\n{}", req.0.direction, meta))
    }

    #[tool(
        description = "Read the page. First call (or force=true) returns the full text; later calls return only what changed since the previous call when that is smaller. Interactive elements appear as [index]{role}(name). Long output is paged: pass the cursor from [NEXT CURSOR: n]. Use search to return only context around a term, or percent to jump into the text."
    )]
    async fn get_page_info(
        &self,
        req: Parameters<PageInfoParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let info = session
            .get_page_info(&PageInfoRequest::from(req.0))
            .await
            .map_err(err)?;
        text_ok(info.to_string())
    }

    #[tool(description = "Go back in browser history and return the fresh page.")]
    async fn go_back(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let nav = session.go_back().await.map_err(err)?;
        text_ok(format!("Navigated back\n{}", nav))
    }

    #[tool(description = "Go forward in browser history and return the fresh page.")]
    async fn go_forward(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let nav = session.go_forward().await.map_err(err)?;
        text_ok(format!("Navigated forward\n{}", nav))
    }

    #[tool(description = "Reload the page and return it.")]
    async fn reload(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        let nav = session.reload().await.map_err(err)?;
        text_ok(format!("Reloaded\n{}", nav))
    }

    #[tool(description = "Run a JavaScript expression in the page and return the result as JSON.")]
    async fn evaluate(
        &self,
        req: Parameters<EvaluateRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        let value = session.evaluate(&req.0.expression).await.map_err(err)?;
        text_ok(serde_json::to_string_pretty(&value).map_err(err)?)
    }

    #[tool(description = "List interactive elements as [index]{role}(name), one per line.")]
    async fn elements(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.connected().await?;
        let session = guard.as_mut().ok_or_else(no_session)?;
        session.snapshot().await.map_err(err)?;
        let list = session.element_list();
        text_ok(if list.is_empty() {
            "No interactive elements found.".into()
        } else {
            list
        })
    }

    #[tool(description = "Take a PNG screenshot of the viewport.")]
    async fn screenshot(&self) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        let png = session.screenshot().await.map_err(err)?;
        let meta = session.page_metadata().await.map_err(err)?;
        Ok(CallToolResult::success(vec![
            Content::image(BASE64.encode(&png), "image/png"),
            Content::text(meta.to_string()),
        ]))
    }

    #[tool(description = "Get URL, title, ready state, scroll offset and viewport size.")]
    async fn page_metadata(&self) -> Result<CallToolResult, ErrorData> {
        let guard = self.connected().await?;
        let session = guard.as_ref().ok_or_else(no_session)?;
        let meta = session.page_metadata().await.map_err(err)?;
        text_ok(meta.to_string())
    }

    #[tool(description = "Disconnect from the browser. The next call reconnects.")]
    async fn close(&self) -> Result<CallToolResult, ErrorData> {
        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            session.close().await.map_err(err)?;
        }
        text_ok("Session closed.")
    }
}

#[tool_handler]
impl ServerHandler for CdpilotServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "cdpilot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Browser control over the Chrome DevTools Protocol. Use 'navigate' to open a URL \
                 (connects to the running browser automatically), then 'get_page_info' to read \
                 the page: interactive elements appear inline as [index]{role}(name). Act by \
                 index with click_element/focus_element/hover_element, type with 'type_text'. \
                 Later get_page_info calls return only what changed. Indices go stale when the \
                 page changes, so re-read before reusing one."
                    .into(),
            ),
        }
    }
}

pub async fn run_server(config: AgentConfig) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = CdpilotServer::new(config);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
