//! Toolbelt - the actions an agent can take against the target API
//!
//! Every call returns an [`Observation`]. Transport faults, timeouts, non-2xx
//! statuses, unknown tools and bad parameters all become `success=false`
//! observations; nothing here returns an error to the agent loop.

pub mod tools;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics::{TOOL_CALLS, TOOL_CALL_DURATION};

pub use tools::{tool_descriptions, HttpRequest, ToolCall, ToolDispatchError, ToolKind, FINISH_TOOL};

/// Machine-readable class of a failed observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connect,
    HttpStatus,
    InvalidParameters,
    UnknownTool,
    Decode,
    Transport,
}

/// Structured result of dispatching a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Observation {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            error_kind: None,
            status: None,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            error_kind: Some(kind),
            status: None,
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl From<ToolDispatchError> for Observation {
    fn from(e: ToolDispatchError) -> Self {
        let kind = match e {
            ToolDispatchError::UnknownTool(_) => FailureKind::UnknownTool,
            ToolDispatchError::InvalidParameters { .. } => FailureKind::InvalidParameters,
        };
        Observation::failed(kind, e.to_string())
    }
}

/// Registry of tools bound to one target API
#[derive(Clone)]
pub struct Toolbelt {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Toolbelt {
    /// Create a toolbelt for the API at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Target API base URL (e.g., "http://localhost:8001")
    /// * `timeout` - Upper bound on each HTTP call, connection included
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve and validate a tool invocation without executing it
    pub fn resolve(&self, name: &str, parameters: &Value) -> Result<ToolCall, ToolDispatchError> {
        let kind = ToolKind::resolve(name)?;
        let empty = Map::new();
        let params = match parameters {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ToolDispatchError::InvalidParameters {
                    tool: kind.name(),
                    reason: "parameters must be an object".to_string(),
                })
            }
        };
        kind.bind(params)
    }

    /// The single entry point for the agent to use a tool
    pub async fn use_tool(&self, name: &str, parameters: &Value) -> Observation {
        let call = match self.resolve(name, parameters) {
            Ok(call) => call,
            Err(e) => {
                let label = match &e {
                    ToolDispatchError::UnknownTool(_) => "unknown",
                    ToolDispatchError::InvalidParameters { tool, .. } => *tool,
                };
                TOOL_CALLS.with_label_values(&[label, "rejected"]).inc();
                warn!(tool = %name, error = %e, "Tool dispatch rejected");
                return e.into();
            }
        };
        self.execute(&call).await
    }

    /// Execute a validated call
    pub async fn execute(&self, call: &ToolCall) -> Observation {
        let tool = call.kind().name();

        let Some(request) = call.request() else {
            // Local actions never touch the network
            return match call {
                ToolCall::Finish { summary } => Observation::ok(json!({
                    "finished": true,
                    "summary": summary
                })),
                _ => Observation::ok(Value::Null),
            };
        };

        let span = info_span!("tool_call", tool = tool, path = %request.path);
        let start = Instant::now();
        let observation = self.send(request).instrument(span).await;
        TOOL_CALL_DURATION
            .with_label_values(&[tool])
            .observe(start.elapsed().as_secs_f64());
        TOOL_CALLS
            .with_label_values(&[tool, if observation.success { "ok" } else { "error" }])
            .inc();
        observation
    }

    async fn send(&self, request: HttpRequest) -> Observation {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => {
                return Observation::failed(
                    FailureKind::Timeout,
                    format!("request to {} timed out after {}ms", request.path, self.timeout.as_millis()),
                )
            }
            Ok(Err(e)) => return transport_failure(&e),
            Ok(Ok(pair)) => pair,
        };

        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        debug!(status = status.as_u16(), "Target API responded");

        if status.is_success() {
            Observation::ok(data).with_status(status.as_u16())
        } else {
            Observation::failed(FailureKind::HttpStatus, format!("HTTP {}", status))
                .with_status(status.as_u16())
                .with_data(data)
        }
    }
}

fn transport_failure(e: &reqwest::Error) -> Observation {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_connect() {
        FailureKind::Connect
    } else if e.is_decode() || e.is_body() {
        FailureKind::Decode
    } else {
        FailureKind::Transport
    };
    Observation::failed(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_tool_is_failed_observation() {
        let toolbelt = Toolbelt::new("http://127.0.0.1:9", Duration::from_secs(1));
        let obs = toolbelt.use_tool("nonexistent_tool", &json!({})).await;
        assert!(!obs.success);
        assert_eq!(obs.error_kind, Some(FailureKind::UnknownTool));
        assert!(!obs.error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_parameters_rejected() {
        let toolbelt = Toolbelt::new("http://127.0.0.1:9", Duration::from_secs(1));
        let obs = toolbelt.use_tool("search_products", &json!(["mouse"])).await;
        assert!(!obs.success);
        assert_eq!(obs.error_kind, Some(FailureKind::InvalidParameters));
    }

    #[tokio::test]
    async fn test_finish_is_local() {
        // Port 9 (discard) is never contacted for local actions
        let toolbelt = Toolbelt::new("http://127.0.0.1:9", Duration::from_secs(1));
        let obs = toolbelt.use_tool("finish", &json!({"summary": "done"})).await;
        assert!(obs.success);
        assert_eq!(obs.data["summary"], "done");
    }

    #[test]
    fn test_observation_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&Observation::ok(json!({"total": 0}))).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));
    }
}
