//! Client-facing message types.
//!
//! Inbound control commands are one JSON object per line:
//!
//! ```json
//! {"type": "start", "config": {"nx": 256, "ny": 256, "model": "circle"}}
//! {"type": "stop"}
//! ```
//!
//! Outbound messages are metadata and analytics (JSON) plus raw frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, Result};

/// Command from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Launch a run with the given engine options, replacing any active run.
    Start {
        /// Engine options, forwarded as command-line arguments.
        #[serde(default)]
        config: BTreeMap<String, Value>,
    },
    /// Terminate the active run, if any.
    Stop,
}

impl ControlCommand {
    /// Parse one control line.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| RelayError::InvalidControl(e.to_string()))
    }
}

/// Convert a start configuration into engine command-line arguments.
///
/// Keys are passed through as `--key value`; the engine rejects unknown
/// names. `null` values are skipped so that the engine applies its default.
pub fn engine_args(config: &BTreeMap<String, Value>) -> Result<Vec<String>> {
    let mut args = Vec::with_capacity(config.len() * 2);

    for (key, value) in config {
        let valid_key = !key.is_empty()
            && !key.starts_with('-')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_key {
            return Err(RelayError::InvalidConfig(format!("bad option name {:?}", key)));
        }

        let value = match value {
            Value::Null => continue,
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(RelayError::InvalidConfig(format!(
                    "option {:?} must be a scalar",
                    key
                )))
            }
        };

        args.push(format!("--{}", key.replace('_', "-")));
        args.push(value);
    }

    Ok(args)
}

/// Analytics channel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsKey {
    /// Average step time reported by the engine.
    Gpu,
    /// Field energy.
    Energy,
}

/// Text message to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Grid dimensions, sent once the engine header is parsed.
    Metadata {
        /// Grid width.
        nx: usize,
        /// Grid height.
        ny: usize,
    },
    /// One formatted analytics value.
    Analytics {
        /// Channel the value belongs to.
        key: AnalyticsKey,
        /// Display string.
        value: String,
    },
}

impl ClientMessage {
    /// Analytics message for a PERF report.
    pub fn perf(step_ms_avg: f64) -> Self {
        ClientMessage::Analytics {
            key: AnalyticsKey::Gpu,
            value: format!("{:.3} ms/step", step_ms_avg),
        }
    }

    /// Analytics message for an ENERGY report.
    pub fn energy(val: f64) -> Self {
        ClientMessage::Analytics {
            key: AnalyticsKey::Energy,
            value: format!("{:.3e}", val),
        }
    }
}

/// Anything the relay sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Metadata or analytics.
    Message(ClientMessage),
    /// One complete frame, byte-for-byte as the engine produced it.
    Frame(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_start() {
        let cmd = ControlCommand::parse(r#"{"type":"start","config":{"nx":128,"model":"circle"}}"#)
            .unwrap();
        match cmd {
            ControlCommand::Start { config } => {
                assert_eq!(config["nx"], json!(128));
                assert_eq!(config["model"], json!("circle"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_start_without_config() {
        let cmd = ControlCommand::parse(r#"{"type":"start"}"#).unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Start {
                config: BTreeMap::new()
            }
        );
    }

    #[test]
    fn test_parse_stop() {
        assert_eq!(ControlCommand::parse(r#"{"type":"stop"}"#).unwrap(), ControlCommand::Stop);
    }

    #[test]
    fn test_parse_malformed() {
        for line in ["", "stop", "{", r#"{"type":"pause"}"#, r#"{"config":{}}"#] {
            assert!(matches!(
                ControlCommand::parse(line),
                Err(RelayError::InvalidControl(_))
            ));
        }
    }

    #[test]
    fn test_engine_args() {
        let mut config = BTreeMap::new();
        config.insert("nx".to_string(), json!(64));
        config.insert("frames_every".to_string(), json!(5));
        config.insert("model".to_string(), json!("two_layer"));
        config.insert("sx".to_string(), Value::Null);
        config.insert("dt".to_string(), json!(0.25));

        let args = engine_args(&config).unwrap();
        assert_eq!(
            args,
            vec![
                "--dt",
                "0.25",
                "--frames-every",
                "5",
                "--model",
                "two_layer",
                "--nx",
                "64",
            ]
        );
    }

    #[test]
    fn test_engine_args_rejects_flag_injection() {
        let mut config = BTreeMap::new();
        config.insert("-nx".to_string(), json!(1));
        assert!(engine_args(&config).is_err());

        let mut config = BTreeMap::new();
        config.insert("nx ny".to_string(), json!(1));
        assert!(engine_args(&config).is_err());
    }

    #[test]
    fn test_engine_args_rejects_nested() {
        let mut config = BTreeMap::new();
        config.insert("nx".to_string(), json!([1, 2]));
        assert!(matches!(engine_args(&config), Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn test_client_message_json() {
        let meta = serde_json::to_value(ClientMessage::Metadata { nx: 3, ny: 4 }).unwrap();
        assert_eq!(meta, json!({"type": "metadata", "nx": 3, "ny": 4}));

        let perf = serde_json::to_value(ClientMessage::perf(1.5)).unwrap();
        assert_eq!(perf, json!({"type": "analytics", "key": "gpu", "value": "1.500 ms/step"}));

        let energy = serde_json::to_value(ClientMessage::energy(12346.0)).unwrap();
        assert_eq!(energy, json!({"type": "analytics", "key": "energy", "value": "1.235e4"}));
    }
}
