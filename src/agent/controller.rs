//! Agent - one persona's reason / plan / act / observe loop
//!
//! The agent owns its memory outright. Each step rebuilds the prompt from the
//! persona, goal and memory, asks the model for a decision, dispatches it
//! through the toolbelt and records what happened. Progress is published to
//! the session's broadcast channel as it happens.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::memory::{build_prompt, Memory, Role, Turn};
use super::parser::{parse_decision, Decision};
use crate::config::DEFAULT_MAX_STEPS;
use crate::metrics::{AGENT_STEPS, PARSE_FAILURES};
use crate::model::{LanguageModel, LlmError};
use crate::personas::Persona;
use crate::session::broadcast::EventEmitter;
use crate::session::events::EventKind;
use crate::toolbelt::{tool_descriptions, Observation, ToolKind, Toolbelt};

/// What the agent does when the model's output can't be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailurePolicy {
    /// Record a corrective note and move on to the next step
    SkipStep,
    /// End this persona's run
    Abort,
}

/// Fixed policy for unparseable model output
pub const PARSE_FAILURE_POLICY: ParseFailurePolicy = ParseFailurePolicy::SkipStep;

/// Markers a target API uses to confirm a placed order
pub const CHECKOUT_CONFIRMATIONS: &[&str] = &["Checkout successful", "ORDER CONFIRMED"];

/// Configuration for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Step budget used when the caller doesn't pass one
    pub max_steps: usize,
    /// Upper bound on each model call
    pub llm_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            llm_timeout: Duration::from_secs(60),
        }
    }
}

/// How a persona's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Budget exhausted or completion declared
    Completed,
    /// A fatal error stopped the loop
    Failed,
    /// The session was cancelled
    Cancelled,
}

/// Result of one persona's run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaOutcome {
    pub persona_name: String,
    pub status: OutcomeStatus,
    /// Loop iterations taken, failed ones included
    pub steps: usize,
    /// Whether the run ended by finish or a confirmed checkout
    pub goal_declared_complete: bool,
    /// Whether the target API confirmed the purchase
    pub goal_achieved: bool,
    pub summary: String,
    pub transcript: Vec<Turn>,
}

impl PersonaOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// Outcome for a run that never produced a transcript
    pub fn failed(persona_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            persona_name: persona_name.into(),
            status: OutcomeStatus::Failed,
            steps: 0,
            goal_declared_complete: false,
            goal_achieved: false,
            summary: summary.into(),
            transcript: Vec::new(),
        }
    }
}

enum StepResult {
    Continue,
    /// Declared complete by finish
    Finished(Option<String>),
    /// Checkout confirmed by the target API
    Achieved(String),
    Fatal(String),
    Cancelled,
}

/// Drives one persona against the target API
pub struct Agent {
    persona: Persona,
    toolbelt: Arc<Toolbelt>,
    llm: Arc<dyn LanguageModel>,
    events: EventEmitter,
    config: AgentConfig,
    cancel: CancellationToken,
    memory: Memory,
}

impl Agent {
    /// Create a new agent
    ///
    /// # Arguments
    /// * `persona` - Role the model plays
    /// * `toolbelt` - Actions bound to the target API
    /// * `llm` - Model used to choose each step
    /// * `events` - Where progress is published
    /// * `config` - Agent configuration
    pub fn new(
        persona: Persona,
        toolbelt: Arc<Toolbelt>,
        llm: Arc<dyn LanguageModel>,
        events: EventEmitter,
        config: AgentConfig,
    ) -> Self {
        Self {
            persona,
            toolbelt,
            llm,
            events,
            config,
            cancel: CancellationToken::new(),
            memory: Memory::new(),
        }
    }

    /// Abandon in-flight calls when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The prompt the next step would send
    pub fn prompt(&self, goal: &str) -> String {
        build_prompt(&self.persona, goal, &tool_descriptions(), &self.memory)
    }

    /// Run the loop for up to `max_steps` steps
    pub async fn run(&mut self, goal: &str, max_steps: usize) -> PersonaOutcome {
        let span = info_span!(
            "agent_run",
            persona = %self.persona.name,
            max_steps,
            otel.name = "agent_run"
        );
        self.run_inner(goal, max_steps).instrument(span).await
    }

    async fn run_inner(&mut self, goal: &str, max_steps: usize) -> PersonaOutcome {
        info!(goal = %goal, "Starting persona run");

        let mut steps = 0;
        let mut result = StepResult::Continue;
        while steps < max_steps {
            if self.cancel.is_cancelled() {
                result = StepResult::Cancelled;
                break;
            }
            steps += 1;
            result = self.step(goal, steps).await;
            if !matches!(result, StepResult::Continue) {
                break;
            }
        }

        let name = self.persona.name.clone();
        let (status, declared, achieved, summary) = match result {
            StepResult::Continue => (
                OutcomeStatus::Completed,
                false,
                false,
                format!("step budget of {} exhausted", max_steps),
            ),
            StepResult::Finished(summary) => (
                OutcomeStatus::Completed,
                true,
                false,
                summary.unwrap_or_else(|| "declared the goal complete".to_string()),
            ),
            StepResult::Achieved(summary) => (OutcomeStatus::Completed, true, true, summary),
            StepResult::Fatal(reason) => (OutcomeStatus::Failed, false, false, reason),
            StepResult::Cancelled => {
                AGENT_STEPS.with_label_values(&["cancelled"]).inc();
                (OutcomeStatus::Cancelled, false, false, "run cancelled".to_string())
            }
        };

        match status {
            // The fatal step already published its error event
            OutcomeStatus::Failed => warn!(steps, reason = %summary, "Persona run failed"),
            _ => {
                info!(steps, status = ?status, "Persona run finished");
                self.events.emit(
                    EventKind::Complete,
                    format!("{} finished after {} steps: {}", name, steps, summary),
                    Some(json!({
                        "steps": steps,
                        "outcome": status,
                        "goal_declared_complete": declared,
                        "goal_achieved": achieved,
                        "summary": summary,
                    })),
                );
            }
        }

        PersonaOutcome {
            persona_name: name,
            status,
            steps,
            goal_declared_complete: declared,
            goal_achieved: achieved,
            summary,
            transcript: self.memory.turns().to_vec(),
        }
    }

    async fn step(&mut self, goal: &str, step: usize) -> StepResult {
        let name = self.persona.name.clone();

        // 1. REASON
        let prompt = self.prompt(goal);

        // 2. PLAN
        let completion = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StepResult::Cancelled,
            r = tokio::time::timeout(self.config.llm_timeout, self.llm.complete(&prompt))
                .instrument(info_span!("llm_call", step, otel.name = "llm_call")) => r,
        };
        let raw = match completion {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.model_failure(step, e),
            Err(_) => return self.model_failure(step, LlmError::Timeout(self.config.llm_timeout)),
        };

        let decision = match parse_decision(&raw) {
            Ok(decision) => decision,
            Err(e) => {
                PARSE_FAILURES.inc();
                AGENT_STEPS.with_label_values(&["parse_error"]).inc();
                warn!(step, error = %e, "Model output rejected");
                self.events.emit(
                    EventKind::Error,
                    format!("{} produced an unparseable response at step {}: {}", name, step, e),
                    Some(json!({"step": step, "reason": e.to_string(), "raw": raw})),
                );
                self.memory.push(
                    Role::Error,
                    format!(
                        "Your previous response could not be parsed ({}). Respond with a single JSON object with \"thought\", \"tool_name\" and \"parameters\".",
                        e
                    ),
                );
                return match PARSE_FAILURE_POLICY {
                    ParseFailurePolicy::SkipStep => StepResult::Continue,
                    ParseFailurePolicy::Abort => {
                        StepResult::Fatal(format!("unparseable model response: {}", e))
                    }
                };
            }
        };

        self.events.emit(
            EventKind::Thinking,
            format!("{}: \"{}\"", name, decision.thought),
            Some(json!({"step": step})),
        );

        // 3. ACT
        self.events.emit(
            EventKind::Acting,
            format!("{} is using: {}", name, decision.tool_name),
            Some(json!({
                "step": step,
                "tool": decision.tool_name,
                "parameters": decision.parameters,
            })),
        );
        let parameters = serde_json::Value::Object(decision.parameters.clone());
        let observation = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StepResult::Cancelled,
            obs = self.toolbelt.use_tool(&decision.tool_name, &parameters) => obs,
        };

        // 4. OBSERVE
        self.record(&decision, &observation);
        AGENT_STEPS.with_label_values(&["dispatched"]).inc();
        let rendered = serde_json::to_string(&observation).unwrap_or_default();
        self.events.emit(
            EventKind::Observing,
            format!("{} observed: {}", name, truncate(&rendered, 200)),
            Some(json!({"step": step, "observation": observation})),
        );

        match ToolKind::resolve(&decision.tool_name) {
            Ok(ToolKind::Finish) if observation.success => {
                let summary = decision
                    .parameters
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .map(str::to_string);
                StepResult::Finished(summary)
            }
            Ok(ToolKind::Checkout) if checkout_confirmed(&observation) => {
                info!(step, "Checkout confirmed by target API");
                StepResult::Achieved(format!("checkout confirmed at step {}", step))
            }
            _ => StepResult::Continue,
        }
    }

    fn record(&mut self, decision: &Decision, observation: &Observation) {
        self.memory.push(
            Role::Assistant,
            serde_json::to_string(decision).unwrap_or_default(),
        );
        self.memory.push(
            Role::ToolObservation,
            serde_json::to_string_pretty(observation).unwrap_or_default(),
        );
    }

    fn model_failure(&mut self, step: usize, error: LlmError) -> StepResult {
        AGENT_STEPS.with_label_values(&["llm_error"]).inc();
        let message = format!(
            "{} could not reach the language model at step {}: {}",
            self.persona.name, step, error
        );
        warn!(step, error = %error, "Model call failed");
        self.events.emit(
            EventKind::Error,
            message.clone(),
            Some(json!({"step": step, "reason": error.to_string()})),
        );
        self.memory
            .push(Role::Error, format!("Language model call failed: {}", error));
        StepResult::Fatal(message)
    }
}

fn checkout_confirmed(observation: &Observation) -> bool {
    if !observation.success {
        return false;
    }
    let rendered = match &observation.data {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    CHECKOUT_CONFIRMATIONS
        .iter()
        .any(|marker| rendered.contains(marker))
}

/// Truncate a string to max chars, adding ellipsis if needed
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
