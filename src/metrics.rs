//! Prometheus metrics for observability
//!
//! All metrics live in the default registry and are exported in text format
//! by the `/metrics` route.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    /// Sessions accepted by the session manager
    pub static ref SESSIONS_STARTED: Counter = register_counter!(
        "personaflow_sessions_started_total",
        "Test sessions started"
    ).unwrap();

    /// Sessions that reached a terminal state, by status
    pub static ref SESSIONS_FINISHED: CounterVec = register_counter_vec!(
        "personaflow_sessions_finished_total",
        "Test sessions that reached a terminal state",
        &["status"]
    ).unwrap();

    /// Sessions currently running
    pub static ref ACTIVE_SESSIONS: Gauge = register_gauge!(
        "personaflow_active_sessions",
        "Test sessions currently running"
    ).unwrap();

    /// Agent steps, by result (dispatched, parse_error, llm_error, cancelled)
    pub static ref AGENT_STEPS: CounterVec = register_counter_vec!(
        "personaflow_agent_steps_total",
        "Agent loop iterations by result",
        &["result"]
    ).unwrap();

    /// Toolbelt dispatches, by tool and outcome
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "personaflow_tool_calls_total",
        "Toolbelt dispatches by tool and outcome",
        &["tool", "status"]
    ).unwrap();

    /// Wall-clock time of target-API calls
    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "personaflow_tool_call_duration_seconds",
        "Target API call latency",
        &["tool"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Wall-clock time of language-model calls
    pub static ref LLM_CALL_DURATION: Histogram = register_histogram!(
        "personaflow_llm_call_duration_seconds",
        "Language model call latency",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    /// Model responses that could not be parsed into a decision
    pub static ref PARSE_FAILURES: Counter = register_counter!(
        "personaflow_parse_failures_total",
        "Model responses rejected by the response parser"
    ).unwrap();

    /// Events an observer lost because it fell behind
    pub static ref DROPPED_DELIVERIES: Counter = register_counter!(
        "personaflow_dropped_deliveries_total",
        "Log events dropped for slow observers"
    ).unwrap();
}

/// Encode every registered metric in the Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
