//! Integration tests for session lifecycle and event streaming

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use personaflow::agent::{OutcomeStatus, PersonaOutcome};
use personaflow::architect::{ReportSynthesizer, SynthesisError};
use personaflow::config::EngineConfig;
use personaflow::model::{LanguageModel, LlmError};
use personaflow::personas::Persona;
use personaflow::session::{
    Delivery, EventKind, LogEvent, SessionError, SessionManager, SessionRequest, SessionStatus,
};

/// Fails for personas whose prompt mentions BROKEN, finishes for everyone else
struct RoutedModel;

#[async_trait]
impl LanguageModel for RoutedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("BROKEN") {
            return Err(LlmError::Status {
                status: 500,
                body: "model crashed".into(),
            });
        }
        if prompt.contains("No actions taken yet.") {
            return Ok(
                json!({"thought": "look around", "tool_name": "get_products", "parameters": {}})
                    .to_string(),
            );
        }
        Ok(json!({"thought": "done", "tool_name": "finish", "parameters": {"summary": "fine"}})
            .to_string())
    }
}

struct StalledModel;

#[async_trait]
impl LanguageModel for StalledModel {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

enum ReportBehaviour {
    Succeed,
    Fail,
    Stall,
}

struct FakeArchitect(ReportBehaviour);

#[async_trait]
impl ReportSynthesizer for FakeArchitect {
    async fn synthesize(&self, goal: &str, outcomes: &[PersonaOutcome]) -> Result<String, SynthesisError> {
        match self.0 {
            ReportBehaviour::Succeed => Ok(format!(
                "### Executive Summary\n{} personas tried \"{}\"",
                outcomes.len(),
                goal
            )),
            ReportBehaviour::Fail => Err(SynthesisError::EmptyReport),
            ReportBehaviour::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        http_timeout: Duration::from_secs(2),
        llm_timeout: Duration::from_secs(2),
        synthesis_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    }
}

fn manager(llm: impl LanguageModel + 'static, report: ReportBehaviour, config: EngineConfig) -> SessionManager {
    SessionManager::new(Arc::new(llm), Arc::new(FakeArchitect(report)), config)
}

async fn shop_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "name": "Keyboard"}])))
        .mount(&server)
        .await;
    server
}

fn request(personas: Vec<Persona>, api_url: &str) -> SessionRequest {
    SessionRequest {
        personas,
        goal: "Buy a keyboard".into(),
        target_api_url: api_url.into(),
        max_steps: Some(4),
    }
}

fn events(deliveries: Vec<Delivery>) -> Vec<LogEvent> {
    deliveries
        .into_iter()
        .filter_map(|d| match d {
            Delivery::Event(e) => Some(e),
            Delivery::Dropped(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_one_failing_persona_does_not_fail_the_session() {
    let server = shop_api().await;
    let manager = manager(RoutedModel, ReportBehaviour::Succeed, config());
    let personas = vec![
        Persona::new("Alice", "You are Alice. BROKEN"),
        Persona::new("Bob", "You are Bob."),
    ];

    let id = manager.start_session(request(personas, &server.uri())).unwrap();
    let summary = manager.wait(&id).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Complete);
    assert!(summary.has_report);
    assert!(summary.completed_at.is_some());

    let alice = summary.outcomes.iter().find(|o| o.persona_name == "Alice").unwrap();
    let bob = summary.outcomes.iter().find(|o| o.persona_name == "Bob").unwrap();
    assert_eq!(alice.status, OutcomeStatus::Failed);
    assert_eq!(bob.status, OutcomeStatus::Completed);
    assert!(bob.goal_declared_complete);
    assert_eq!(bob.steps, 2);

    let report = manager.report(&id).unwrap().unwrap();
    assert!(report.contains("2 personas"));
}

#[tokio::test]
async fn test_terminal_event_is_last_and_unique() {
    let server = shop_api().await;
    let manager = manager(RoutedModel, ReportBehaviour::Succeed, config());
    let personas = vec![Persona::new("Alice", "You are Alice."), Persona::new("Bob", "You are Bob.")];

    let id = manager.start_session(request(personas, &server.uri())).unwrap();
    let all = events(manager.attach(&id).unwrap().into_stream().collect().await);

    let terminal: Vec<&LogEvent> = all
        .iter()
        .filter(|e| e.kind == EventKind::Complete && e.persona_name.is_none())
        .collect();
    assert_eq!(terminal.len(), 1);

    let last = all.last().unwrap();
    assert!(last.persona_name.is_none());
    assert_eq!(last.kind, EventKind::Complete);
    let data = last.data.as_ref().unwrap();
    assert_eq!(data["status"], "complete");
    assert!(data["report"].as_str().unwrap().starts_with("### Executive Summary"));
    assert_eq!(data["results"].as_array().unwrap().len(), 2);

    // Per-persona events keep their own order
    for name in ["Alice", "Bob"] {
        let kinds: Vec<EventKind> = all
            .iter()
            .filter(|e| e.persona_name.as_deref() == Some(name))
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&EventKind::Thinking));
        assert_eq!(kinds.last(), Some(&EventKind::Complete));
    }
}

#[tokio::test]
async fn test_late_joiner_receives_full_history() {
    let server = shop_api().await;
    let manager = manager(RoutedModel, ReportBehaviour::Succeed, config());
    let id = manager
        .start_session(request(vec![Persona::new("Bob", "You are Bob.")], &server.uri()))
        .unwrap();

    let early = events(manager.attach(&id).unwrap().into_stream().collect().await);
    let late = events(manager.attach(&id).unwrap().into_stream().collect().await);

    assert!(!early.is_empty());
    assert_eq!(early, late);
    let seqs: Vec<u64> = late.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..late.len() as u64).collect::<Vec<_>>());
    assert!(late.iter().all(|e| e.session_id == id));
}

#[tokio::test]
async fn test_synthesis_failure_marks_session_failed() {
    let server = shop_api().await;
    let manager = manager(RoutedModel, ReportBehaviour::Fail, config());
    let id = manager
        .start_session(request(vec![Persona::new("Bob", "You are Bob.")], &server.uri()))
        .unwrap();

    let all = events(manager.attach(&id).unwrap().into_stream().collect().await);
    let summary = manager.inspect(&id).unwrap();

    assert_eq!(summary.status, SessionStatus::Failed);
    assert!(manager.report(&id).unwrap().is_none());
    let last = all.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.data.as_ref().unwrap()["status"], "failed");
    assert!(last.data.as_ref().unwrap()["report"].is_null());
}

#[tokio::test]
async fn test_synthesis_timeout_marks_session_failed() {
    let server = shop_api().await;
    let manager = manager(RoutedModel, ReportBehaviour::Stall, config());
    let id = manager
        .start_session(request(vec![Persona::new("Bob", "You are Bob.")], &server.uri()))
        .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), manager.wait(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Failed);
    assert!(!summary.has_report);
}

#[tokio::test]
async fn test_cancel_stops_every_persona() {
    let manager = manager(StalledModel, ReportBehaviour::Succeed, config());
    let personas = vec![Persona::new("Alice", "a"), Persona::new("Bob", "b")];
    let id = manager
        .start_session(request(personas, "http://127.0.0.1:9"))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel(&id).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), manager.wait(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Failed);
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::Cancelled));

    let history = manager.get(&id).unwrap().channel().history();
    let last = history.last().unwrap();
    assert_eq!(last.data.as_ref().unwrap()["cancelled"], true);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let manager = manager(RoutedModel, ReportBehaviour::Succeed, config());
    assert!(matches!(manager.attach("nope"), Err(SessionError::NotFound(_))));
    assert!(matches!(manager.inspect("nope"), Err(SessionError::NotFound(_))));
    assert!(matches!(manager.cancel("nope"), Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let manager = manager(RoutedModel, ReportBehaviour::Succeed, config());
    let err = manager
        .start_session(request(Vec::new(), "http://localhost:8001"))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidRequest(_)));
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn test_finished_session_is_removed_after_retention() {
    let server = shop_api().await;
    let manager = manager(
        RoutedModel,
        ReportBehaviour::Succeed,
        EngineConfig {
            session_retention: Duration::from_millis(50),
            ..config()
        },
    );
    let id = manager
        .start_session(request(vec![Persona::new("Bob", "You are Bob.")], &server.uri()))
        .unwrap();
    manager.wait(&id).await.unwrap();

    let mut removed = false;
    for _ in 0..100 {
        if manager.inspect(&id).is_err() {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(removed);
}
