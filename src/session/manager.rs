//! Session manager - runs a batch of personas and finalizes the report
//!
//! `start_session` returns as soon as the session is registered. A supervisor
//! task then spawns one agent per persona, collects their outcomes, asks the
//! synthesizer for a report and emits the session's terminal event. The
//! supervisor is the only writer of a session's aggregate state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::broadcast::{BroadcastChannel, Subscription};
use super::events::{EventKind, LogEvent};
use crate::agent::{Agent, AgentConfig, OutcomeStatus, PersonaOutcome};
use crate::architect::{ReportSynthesizer, SynthesisError};
use crate::config::EngineConfig;
use crate::metrics::{ACTIVE_SESSIONS, SESSIONS_FINISHED, SESSIONS_STARTED};
use crate::model::LanguageModel;
use crate::personas::Persona;
use crate::toolbelt::Toolbelt;

/// Errors surfaced to callers of the session control surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Lifecycle of a session; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Complete,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Complete => "complete",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub personas: Vec<Persona>,
    pub goal: String,
    pub target_api_url: String,
    /// Falls back to the configured default when `None`
    pub max_steps: Option<usize>,
}

/// Per-persona outcome without the transcript
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub persona_name: String,
    pub status: OutcomeStatus,
    pub steps: usize,
    pub goal_declared_complete: bool,
    pub goal_achieved: bool,
    pub summary: String,
}

impl From<&PersonaOutcome> for OutcomeSummary {
    fn from(o: &PersonaOutcome) -> Self {
        Self {
            persona_name: o.persona_name.clone(),
            status: o.status,
            steps: o.steps,
            goal_declared_complete: o.goal_declared_complete,
            goal_achieved: o.goal_achieved,
            summary: o.summary.clone(),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub goal: String,
    pub api_url: String,
    pub personas: Vec<String>,
    pub max_steps: usize,
    pub log_count: usize,
    pub observers: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<OutcomeSummary>,
    pub has_report: bool,
}

struct SessionState {
    status: SessionStatus,
    outcomes: Vec<PersonaOutcome>,
    final_report: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

/// One batch run of personas against one target API
pub struct Session {
    id: String,
    goal: String,
    target_api_url: String,
    personas: Vec<Persona>,
    max_steps: usize,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    channel: Arc<BroadcastChannel>,
    cancel: CancellationToken,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &Arc<BroadcastChannel> {
        &self.channel
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn final_report(&self) -> Option<String> {
        self.lock().final_report.clone()
    }

    pub fn outcomes(&self) -> Vec<PersonaOutcome> {
        self.lock().outcomes.clone()
    }

    fn record_outcome(&self, outcome: PersonaOutcome) {
        self.lock().outcomes.push(outcome);
    }

    /// Move to a terminal status; a session that is already terminal is left alone
    fn finish(&self, status: SessionStatus, report: Option<String>) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.final_report = report;
        state.completed_at = Some(Utc::now());
        true
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.lock();
        SessionSummary {
            session_id: self.id.clone(),
            status: state.status,
            goal: self.goal.clone(),
            api_url: self.target_api_url.clone(),
            personas: self.personas.iter().map(|p| p.name.clone()).collect(),
            max_steps: self.max_steps,
            log_count: self.channel.len(),
            observers: self.channel.observer_count(),
            created_at: self.created_at,
            completed_at: state.completed_at,
            outcomes: state.outcomes.iter().map(OutcomeSummary::from).collect(),
            has_report: state.final_report.is_some(),
        }
    }
}

type SessionMap = Arc<RwLock<HashMap<String, Arc<Session>>>>;

/// Creates sessions, runs their agents and hands out subscriptions
pub struct SessionManager {
    sessions: SessionMap,
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn ReportSynthesizer>,
    config: EngineConfig,
}

impl SessionManager {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn ReportSynthesizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            llm,
            synthesizer,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a session and launch its agents in the background
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_session(&self, request: SessionRequest) -> Result<String, SessionError> {
        validate(&request)?;

        let id = Uuid::now_v7().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            goal: request.goal,
            target_api_url: request.target_api_url,
            personas: request.personas,
            max_steps: request.max_steps.unwrap_or(self.config.max_steps),
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Running,
                outcomes: Vec::new(),
                final_report: None,
                completed_at: None,
            }),
            channel: Arc::new(BroadcastChannel::new(id.clone(), self.config.observer_buffer)),
            cancel: CancellationToken::new(),
        });

        self.write_sessions().insert(id.clone(), Arc::clone(&session));
        SESSIONS_STARTED.inc();
        ACTIVE_SESSIONS.inc();
        info!(
            session_id = %id,
            personas = session.personas.len(),
            max_steps = session.max_steps,
            "Session started"
        );

        let supervisor = Supervisor {
            session,
            sessions: Arc::clone(&self.sessions),
            llm: Arc::clone(&self.llm),
            synthesizer: Arc::clone(&self.synthesizer),
            config: self.config.clone(),
        };
        let span = info_span!("session", session_id = %id, otel.name = "session");
        tokio::spawn(supervisor.run().instrument(span));

        Ok(id)
    }

    /// Live subscription to a session's events, history first
    pub fn attach(&self, session_id: &str) -> Result<Subscription, SessionError> {
        Ok(self.get(session_id)?.channel.subscribe())
    }

    /// Publish an event on a session's channel
    pub fn publish(&self, session_id: &str, event: LogEvent) -> Result<Option<u64>, SessionError> {
        Ok(self.get(session_id)?.channel.publish(event))
    }

    pub fn inspect(&self, session_id: &str) -> Result<SessionSummary, SessionError> {
        Ok(self.get(session_id)?.summary())
    }

    /// Final report, `None` while running or when synthesis failed
    pub fn report(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        Ok(self.get(session_id)?.final_report())
    }

    /// Cancel every persona task of a session
    pub fn cancel(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.get(session_id)?;
        info!(session_id = %session_id, "Session cancellation requested");
        session.cancel.cancel();
        Ok(())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> =
            self.read_sessions().values().map(|s| s.summary()).collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Wait until the session's terminal event has been published
    pub async fn wait(&self, session_id: &str) -> Result<SessionSummary, SessionError> {
        let session = self.get(session_id)?;
        let mut subscription = session.channel.subscribe();
        while subscription.next().await.is_some() {}
        Ok(session.summary())
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.read_sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate(request: &SessionRequest) -> Result<(), SessionError> {
    let invalid = |msg: &str| Err(SessionError::InvalidRequest(msg.to_string()));

    if request.personas.is_empty() {
        return invalid("at least one persona is required");
    }
    if request.personas.iter().any(|p| p.name.trim().is_empty()) {
        return invalid("persona names must not be empty");
    }
    if request.goal.trim().is_empty() {
        return invalid("goal must not be empty");
    }
    if request.max_steps == Some(0) {
        return invalid("max_steps must be at least 1");
    }
    match reqwest::Url::parse(&request.target_api_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => invalid("api_url must be an absolute http(s) URL"),
    }
}

/// Background task that owns one session from start to cleanup
struct Supervisor {
    session: Arc<Session>,
    sessions: SessionMap,
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn ReportSynthesizer>,
    config: EngineConfig,
}

impl Supervisor {
    async fn run(self) {
        let session = &self.session;
        let toolbelt = Arc::new(Toolbelt::new(&session.target_api_url, self.config.http_timeout));
        let agent_config = AgentConfig {
            max_steps: session.max_steps,
            llm_timeout: self.config.llm_timeout,
        };

        let handles: Vec<_> = session
            .personas
            .iter()
            .map(|persona| {
                let mut agent = Agent::new(
                    persona.clone(),
                    Arc::clone(&toolbelt),
                    Arc::clone(&self.llm),
                    session.channel.emitter(Some(persona.name.clone())),
                    agent_config.clone(),
                )
                .with_cancellation(session.cancel.child_token());
                let goal = session.goal.clone();
                let max_steps = session.max_steps;
                let handle = tokio::spawn(async move { agent.run(&goal, max_steps).await });
                (persona.name.clone(), handle)
            })
            .collect();

        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A panicking agent still gets a terminal event
                    warn!(persona = %name, error = %e, "Agent task aborted");
                    let message = format!("{} stopped unexpectedly: {}", name, e);
                    session.channel.emitter(Some(name.clone())).emit(
                        EventKind::Error,
                        message.clone(),
                        None,
                    );
                    PersonaOutcome::failed(name, message)
                }
            };
            session.record_outcome(outcome);
        }

        self.finalize().await;
        self.retain().await;
    }

    async fn finalize(&self) {
        let session = &self.session;
        let outcomes = session.outcomes();
        let results: Vec<OutcomeSummary> = outcomes.iter().map(OutcomeSummary::from).collect();
        let emitter = session.channel.emitter(None);

        let synthesis = if session.cancel.is_cancelled() {
            None
        } else {
            let synthesize = tokio::time::timeout(
                self.config.synthesis_timeout,
                self.synthesizer.synthesize(&session.goal, &outcomes),
            );
            tokio::select! {
                biased;
                _ = session.cancel.cancelled() => None,
                r = synthesize => Some(r.unwrap_or(Err(SynthesisError::Timeout))),
            }
        };

        let status = match synthesis {
            None => {
                session.finish(SessionStatus::Failed, None);
                emitter.emit(
                    EventKind::Complete,
                    "Session cancelled",
                    Some(json!({
                        "status": SessionStatus::Failed,
                        "cancelled": true,
                        "report": null,
                        "results": results,
                    })),
                );
                SessionStatus::Failed
            }
            Some(Ok(report)) => {
                session.finish(SessionStatus::Complete, Some(report.clone()));
                emitter.emit(
                    EventKind::Complete,
                    "All persona tests completed!",
                    Some(json!({
                        "status": SessionStatus::Complete,
                        "report": report,
                        "results": results,
                    })),
                );
                SessionStatus::Complete
            }
            Some(Err(e)) => {
                warn!(error = %e, "Report synthesis failed");
                session.finish(SessionStatus::Failed, None);
                emitter.emit(
                    EventKind::Error,
                    format!("Report synthesis failed: {}", e),
                    None,
                );
                emitter.emit(
                    EventKind::Complete,
                    format!("Persona tests finished without a report: {}", e),
                    Some(json!({
                        "status": SessionStatus::Failed,
                        "report": null,
                        "error": e.to_string(),
                        "results": results,
                    })),
                );
                SessionStatus::Failed
            }
        };

        session.channel.close();
        SESSIONS_FINISHED.with_label_values(&[status.as_str()]).inc();
        ACTIVE_SESSIONS.dec();
        info!(status = status.as_str(), "Session finished");
    }

    /// Keep a terminal session around until its observers are gone
    async fn retain(&self) {
        let grace = self.config.session_retention.max(Duration::from_millis(10));
        loop {
            tokio::time::sleep(grace).await;
            if self.session.channel.observer_count() == 0 {
                break;
            }
        }
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.session.id);
        info!("Session removed");
    }
}
