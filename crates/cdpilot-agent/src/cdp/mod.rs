//! Chrome DevTools Protocol plumbing.
//!
//! Everything above this module talks to the browser through [`Transport`],
//! which lets tests substitute a scripted connection.

mod connection;

pub use connection::CdpConnection;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::{Error, Result};

/// A protocol event pushed by the browser (e.g. `Page.loadEventFired`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// One live protocol connection to one browser target.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Issue a command and wait for its result.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Receive every event pushed after this call.
    fn subscribe(&self) -> broadcast::Receiver<CdpEvent>;
}

/// `Runtime.evaluate` with `returnByValue`, turning thrown exceptions into
/// [`Error::Evaluation`]. An `undefined` result comes back as `Value::Null`.
pub async fn evaluate(transport: &dyn Transport, expression: &str) -> Result<Value> {
    let response = transport
        .call(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;

    if let Some(details) = response.get("exceptionDetails") {
        return Err(Error::Evaluation(exception_message(details)));
    }

    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Like [`evaluate`], deserializing the returned value.
pub async fn evaluate_as<T: serde::de::DeserializeOwned>(
    transport: &dyn Transport,
    expression: &str,
) -> Result<T> {
    let value = evaluate(transport, expression).await?;
    Ok(serde_json::from_value(value)?)
}

fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("unknown exception")
        .to_string()
}
