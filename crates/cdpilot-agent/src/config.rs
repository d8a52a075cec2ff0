//! Agent configuration, loaded from YAML.
//!
//! Every field has a default, so an empty document is a valid config.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level config structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// DevTools connection settings.
    pub connection: ConnectionConfig,

    /// Navigation bounds.
    pub navigation: NavigationConfig,

    /// Input pacing.
    pub input: InputConfig,

    /// Page-info diffing and pagination.
    pub observation: ObservationConfig,
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse config from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        // serde_yaml rejects an empty document; treat it as all defaults
        let config: AgentConfig = if yaml.trim().is_empty() {
            AgentConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<()> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(Error::Config("connection.endpoint is required".into()));
        }
        if self.input.keystroke_delay_min_ms > self.input.keystroke_delay_max_ms {
            return Err(Error::Config(
                "input.keystroke_delay_min_ms must not exceed keystroke_delay_max_ms".into(),
            ));
        }
        if self.observation.chunk_size == 0 {
            return Err(Error::Config(
                "observation.chunk_size must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.observation.numeric_churn_ratio) {
            return Err(Error::Config(
                "observation.numeric_churn_ratio must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}

/// Where and how to reach the browser.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `ws://` page target URL, or an `http://host:port` DevTools address.
    pub endpoint: String,

    /// Bound on establishing the websocket.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9222".into(),
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Hard bound on navigate/back/forward/reload.
    pub timeout_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Timings for simulated pointer and keyboard input.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub keystroke_delay_min_ms: u64,
    pub keystroke_delay_max_ms: u64,
    /// Pause after a full typing sequence.
    pub typing_settle_ms: u64,
    /// Pause between pointer moves of an approach.
    pub pointer_pause_ms: u64,
    /// Maximum distance of the intermediate approach point from the target.
    pub approach_offset_px: f64,
    /// Wait after a smooth scroll-into-view.
    pub scroll_settle_ms: u64,
    /// Lifetime of the click marker drawn on the page.
    pub click_marker_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            keystroke_delay_min_ms: 30,
            keystroke_delay_max_ms: 90,
            typing_settle_ms: 300,
            pointer_pause_ms: 40,
            approach_offset_px: 40.0,
            scroll_settle_ms: 400,
            click_marker_ms: 600,
        }
    }
}

/// Diff fallback heuristics and chunking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Chunk budget in bytes.
    pub chunk_size: usize,
    /// Characters of context on each side of a search match.
    pub search_context: usize,
    /// Diff is noise when more than this share of its lines are numeric-only.
    pub numeric_churn_ratio: f64,
    /// Diff is noise when it has more lines than this...
    pub fragment_min_lines: usize,
    /// ...and every line is shorter than this.
    pub fragment_max_line_len: usize,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024,
            search_context: 100,
            numeric_churn_ratio: 0.5,
            fragment_min_lines: 10,
            fragment_max_line_len: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = AgentConfig::parse("").unwrap();
        assert_eq!(config.connection.endpoint, "http://127.0.0.1:9222");
        assert_eq!(config.navigation.timeout_ms, 30_000);
        assert_eq!(config.observation.chunk_size, 10240);
        assert_eq!(config.observation.search_context, 100);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
connection:
  endpoint: "ws://127.0.0.1:9222/devtools/page/ABC"
observation:
  numeric_churn_ratio: 0.75
  fragment_min_lines: 20
"#;
        let config = AgentConfig::parse(yaml).unwrap();
        assert_eq!(
            config.connection.endpoint,
            "ws://127.0.0.1:9222/devtools/page/ABC"
        );
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.observation.numeric_churn_ratio, 0.75);
        assert_eq!(config.observation.fragment_min_lines, 20);
        assert_eq!(config.observation.fragment_max_line_len, 10);
    }

    #[test]
    fn test_rejects_inverted_keystroke_delays() {
        let yaml = r#"
input:
  keystroke_delay_min_ms: 200
  keystroke_delay_max_ms: 50
"#;
        let err = AgentConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err}");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = AgentConfig::parse("observation:\n  chunk_size: 0\n").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_rejects_ratio_out_of_range() {
        let err = AgentConfig::parse("observation:\n  numeric_churn_ratio: 1.5\n").unwrap_err();
        assert!(err.to_string().contains("numeric_churn_ratio"));
    }

    #[test]
    fn test_rejects_empty_endpoint() {
        let err = AgentConfig::parse("connection:\n  endpoint: \"\"\n").unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }
}
