//! Websocket CDP client: one socket, one reader task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{CdpEvent, Transport};
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// In-flight commands: id -> (method, reply channel).
type Pending = Arc<Mutex<HashMap<u64, (String, oneshot::Sender<Result<Value>>)>>>;

const EVENT_CAPACITY: usize = 256;

/// Entry from the DevTools `/json/list` endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    web_socket_debugger_url: Option<String>,
}

/// A live CDP connection to a single page target.
pub struct CdpConnection {
    sink: Mutex<WsSink>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to `endpoint`, which is either a page websocket URL or an
    /// `http://host:port` DevTools address whose first page target is used.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let ws_url = tokio::time::timeout(timeout, resolve_ws_url(endpoint))
            .await
            .map_err(|_| Error::Connection(format!("timed out resolving {}", endpoint)))??;

        info!("Connecting to CDP websocket: {}", ws_url);
        let (stream, _) = tokio::time::timeout(timeout, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {}", ws_url)))?
            .map_err(|e| Error::Connection(format!("{}: {}", ws_url, e)))?;

        let (sink, mut stream) = stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let reader = {
            let pending = pending.clone();
            let events = events.clone();
            let connected = connected.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            route_message(text.as_str(), &pending, &events).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!("CDP websocket closed by peer: {:?}", frame);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("CDP websocket error: {}", e);
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                for (_, (method, tx)) in pending.lock().await.drain() {
                    let _ = tx.send(Err(Error::Connection(format!(
                        "connection closed while waiting for {}",
                        method
                    ))));
                }
            })
        };

        Ok(Self {
            sink: Mutex::new(sink),
            pending,
            events,
            next_id: AtomicU64::new(1),
            connected,
            reader,
        })
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for CdpConnection {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Connection("connection closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, (method.to_string(), tx));

        let frame = json!({ "id": id, "method": method, "params": params });
        debug!(id, method, "cdp ->");
        let sent = self
            .sink
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(Error::Connection(format!("failed to send {}: {}", method, e)));
        }

        rx.await.map_err(|_| {
            Error::Connection(format!("connection dropped while waiting for {}", method))
        })?
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

/// Dispatch one incoming frame: a command response or a pushed event.
async fn route_message(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    let json: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unparseable CDP frame: {}", e);
            return;
        }
    };

    if let Some(id) = json.get("id").and_then(Value::as_u64) {
        let Some((method, tx)) = pending.lock().await.remove(&id) else {
            debug!(id, "response for unknown command id");
            return;
        };
        let _ = tx.send(response_result(&method, json));
        return;
    }

    if let Some(method) = json.get("method").and_then(Value::as_str) {
        let event = CdpEvent {
            method: method.to_string(),
            params: json.get("params").cloned().unwrap_or(Value::Null),
        };
        // No receivers is fine
        let _ = events.send(event);
    }
}

/// Split a response frame into its `result` or a protocol error.
fn response_result(method: &str, mut frame: Value) -> Result<Value> {
    if let Some(err) = frame.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown protocol error")
            .to_string();
        return Err(Error::Protocol {
            method: method.to_string(),
            message,
        });
    }
    Ok(frame
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Turn a configured endpoint into a page websocket URL.
async fn resolve_ws_url(endpoint: &str) -> Result<String> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    let list_url = format!("{}/json/list", endpoint.trim_end_matches('/'));
    debug!("Listing DevTools targets at {}", list_url);
    let targets: Vec<TargetInfo> = reqwest::get(&list_url)
        .await
        .map_err(|e| Error::Connection(format!("{}: {}", list_url, e)))?
        .json()
        .await
        .map_err(|e| Error::Connection(format!("{}: {}", list_url, e)))?;

    pick_page_target(targets)
        .ok_or_else(|| Error::Connection(format!("no page target available at {}", endpoint)))
}

fn pick_page_target(targets: Vec<TargetInfo>) -> Option<String> {
    targets
        .into_iter()
        .filter(|t| t.kind == "page")
        .inspect(|t| debug!("Using page target {}", t.url))
        .find_map(|t| t.web_socket_debugger_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_result_extracts_result() {
        let frame = json!({ "id": 3, "result": { "frameId": "F1" } });
        let result = response_result("Page.navigate", frame).unwrap();
        assert_eq!(result, json!({ "frameId": "F1" }));
    }

    #[test]
    fn test_response_result_maps_protocol_error() {
        let frame = json!({ "id": 4, "error": { "code": -32000, "message": "Cannot navigate to invalid URL" } });
        match response_result("Page.navigate", frame) {
            Err(Error::Protocol { method, message }) => {
                assert_eq!(method, "Page.navigate");
                assert_eq!(message, "Cannot navigate to invalid URL");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_pick_page_target_skips_workers() {
        let targets: Vec<TargetInfo> = serde_json::from_value(json!([
            { "type": "service_worker", "url": "sw.js", "webSocketDebuggerUrl": "ws://x/sw" },
            { "type": "page", "url": "about:blank", "webSocketDebuggerUrl": "ws://x/page/1" },
            { "type": "page", "url": "https://b", "webSocketDebuggerUrl": "ws://x/page/2" }
        ]))
        .unwrap();
        assert_eq!(pick_page_target(targets), Some("ws://x/page/1".to_string()));
    }

    #[test]
    fn test_pick_page_target_none() {
        let targets: Vec<TargetInfo> =
            serde_json::from_value(json!([{ "type": "browser", "url": "" }])).unwrap();
        assert_eq!(pick_page_target(targets), None);
    }

    #[tokio::test]
    async fn test_route_message_delivers_response_and_events() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, mut rx_events) = broadcast::channel(8);
        let (tx, rx) = oneshot::channel();
        pending
            .lock()
            .await
            .insert(7, ("Runtime.evaluate".to_string(), tx));

        route_message(r#"{"id":7,"result":{"ok":true}}"#, &pending, &events).await;
        route_message(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5}}"#,
            &pending,
            &events,
        )
        .await;

        assert_eq!(rx.await.unwrap().unwrap(), json!({ "ok": true }));
        let event = rx_events.recv().await.unwrap();
        assert_eq!(event.method, "Page.loadEventFired");
        assert_eq!(event.params["timestamp"], json!(1.5));
        assert!(pending.lock().await.is_empty());
    }
}
