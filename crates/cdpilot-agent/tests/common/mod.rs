//! Scripted stand-in for a browser page, recording every CDP call.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cdpilot_agent::{AgentConfig, CdpEvent, Result, Session, Transport};
use serde_json::{json, Value};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub params: Value,
}

impl Call {
    /// Perception API method for a `Runtime.evaluate` call, e.g. `locate(3)`.
    pub fn api(&self) -> Option<&str> {
        if self.method != "Runtime.evaluate" {
            return None;
        }
        let expr = self.params["expression"].as_str()?;
        if expr.starts_with("void ") {
            return Some("install");
        }
        expr.rsplit_once(").").map(|(_, tail)| tail)
    }
}

pub struct PageState {
    pub url: String,
    pub title: String,
    pub text: String,
    pub elements: Vec<(String, String)>,
    pub history: Vec<String>,
    pub history_index: usize,
    pub fire_load: bool,
}

pub struct MockBrowser {
    calls: Mutex<Vec<Call>>,
    events: broadcast::Sender<CdpEvent>,
    pub state: Mutex<PageState>,
}

impl MockBrowser {
    pub fn new(elements: &[(&str, &str)], text: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            events,
            state: Mutex::new(PageState {
                url: "https://shop.test/".into(),
                title: "Shop".into(),
                text: text.into(),
                elements: elements
                    .iter()
                    .map(|(r, n)| (r.to_string(), n.to_string()))
                    .collect(),
                history: vec!["https://shop.test/".into()],
                history_index: 0,
                fire_load: true,
            }),
        })
    }

    pub fn set_text(&self, text: &str) {
        self.state.lock().unwrap().text = text.into();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Params of every `Input.*` command, in order.
    pub fn input_events(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|c| c.method.starts_with("Input."))
            .map(|c| c.params)
            .collect()
    }

    /// A document load the session did not start, e.g. a link opened by script.
    pub fn fire_load(&self) {
        self.emit("Page.loadEventFired", json!({ "timestamp": 3.0 }));
    }

    fn emit(&self, method: &str, params: Value) {
        let _ = self.events.send(CdpEvent {
            method: method.into(),
            params,
        });
    }

    fn evaluate(&self, expr: &str) -> Value {
        if expr.starts_with("void ") {
            return json!({ "result": { "type": "undefined" } });
        }
        if expr.contains("throw ") {
            return json!({
                "result": { "type": "object" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "Error: boom\n    at <anonymous>:1:7" }
                }
            });
        }

        let state = self.state.lock().unwrap();
        let tail = expr.rsplit_once(").").map(|(_, t)| t).unwrap_or(expr);
        let index_arg = || -> usize {
            tail.split(['(', ')'])
                .nth(1)
                .and_then(|a| a.parse().ok())
                .unwrap_or(usize::MAX)
        };
        let count = state.elements.len();

        let value = if tail.starts_with("snapshot(") {
            let elements: Vec<Value> = state
                .elements
                .iter()
                .enumerate()
                .map(|(i, (role, name))| json!({ "index": i, "role": role, "name": name }))
                .collect();
            json!({ "elements": elements, "text": state.text })
        } else if tail.starts_with("metadata(") {
            json!({
                "url": state.url,
                "title": state.title,
                "readyState": "complete",
                "scrollX": 0,
                "scrollY": 0,
                "viewportWidth": 1280,
                "viewportHeight": 720,
            })
        } else if tail.starts_with("locate(")
            || tail.starts_with("center(")
            || tail.starts_with("focus(")
        {
            let index = index_arg();
            match state.elements.get(index) {
                Some((role, name)) => json!({
                    "found": true,
                    "count": count,
                    "element": { "index": index, "role": role, "name": name },
                    "x": 100.0 + index as f64 * 10.0,
                    "y": 200.0,
                    "focused": true,
                }),
                None => json!({ "found": false, "count": count }),
            }
        } else if tail.starts_with("redispatchClick(") {
            json!(true)
        } else if tail.starts_with("marker(") {
            Value::Null
        } else if expr.trim() == "1 + 1" {
            json!(2)
        } else {
            Value::Null
        };
        json!({ "result": { "type": "object", "value": value } })
    }
}

#[async_trait]
impl Transport for MockBrowser {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            method: method.into(),
            params: params.clone(),
        });

        let reply = match method {
            "Runtime.evaluate" => {
                let expr = params["expression"].as_str().unwrap_or_default();
                self.evaluate(expr)
            }
            "Page.navigate" => {
                let fire = {
                    let mut state = self.state.lock().unwrap();
                    let url = params["url"].as_str().unwrap_or_default().to_string();
                    let keep = state.history_index + 1;
                    state.history.truncate(keep);
                    state.history.push(url.clone());
                    state.history_index = state.history.len() - 1;
                    state.url = url;
                    state.fire_load
                };
                if fire {
                    self.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }));
                }
                json!({ "frameId": "F1", "loaderId": "L1" })
            }
            "Page.getNavigationHistory" => {
                let state = self.state.lock().unwrap();
                let entries: Vec<Value> = state
                    .history
                    .iter()
                    .enumerate()
                    .map(|(i, url)| json!({ "id": i + 1, "url": url, "title": "" }))
                    .collect();
                json!({ "currentIndex": state.history_index, "entries": entries })
            }
            "Page.navigateToHistoryEntry" => {
                {
                    let mut state = self.state.lock().unwrap();
                    let id = params["entryId"].as_u64().unwrap_or(1) as usize;
                    state.history_index = id - 1;
                    state.url = state.history[id - 1].clone();
                }
                self.emit("Page.loadEventFired", json!({ "timestamp": 2.0 }));
                json!({})
            }
            "Page.captureScreenshot" => json!({ "data": "aGVsbG8=" }),
            _ => json!({}),
        };
        Ok(reply)
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }
}

/// Config with every human-cadence delay removed.
pub fn fast_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.input.keystroke_delay_min_ms = 0;
    config.input.keystroke_delay_max_ms = 0;
    config.input.typing_settle_ms = 0;
    config.input.pointer_pause_ms = 0;
    config.input.scroll_settle_ms = 0;
    config.input.click_marker_ms = 0;
    config
}

pub async fn session(mock: &Arc<MockBrowser>) -> Session {
    Session::with_transport(mock.clone(), fast_config())
        .await
        .expect("session over mock transport")
}
