//! PersonaFlow - persona-driven agent execution engine for API testing
//!
//! Each persona drives an LLM reasoning loop against a target HTTP API. A
//! session runs several personas concurrently, streams their progress to
//! observers and finally asks the model for an executive report.
//!
//! # Modules
//!
//! - `agent` - per-persona reasoning loop, memory and response parser
//! - `toolbelt` - the fixed set of HTTP actions against the target API
//! - `session` - session manager and per-session event broadcast
//! - `architect` - report synthesis over all persona outcomes
//! - `ollama` - Ollama client implementing [`LanguageModel`]
//! - `dashboard` - HTTP and WebSocket control surface
//! - `config`, `metrics`, `tracing` - ambient plumbing
//!
//! # Quick Start
//!
//! ```ignore
//! use personaflow::{default_personas, SessionManager, SessionRequest};
//!
//! let id = manager.start_session(SessionRequest {
//!     personas: default_personas(),
//!     goal: "Buy a wireless mouse".into(),
//!     target_api_url: "http://localhost:8001".into(),
//!     max_steps: None,
//! })?;
//! let mut events = manager.attach(&id)?;
//! ```

pub mod agent;
pub mod architect;
pub mod config;
pub mod dashboard;
pub mod metrics;
pub mod model;
pub mod ollama;
pub mod personas;
pub mod session;
pub mod toolbelt;
pub mod tracing;

pub use agent::{Agent, AgentConfig, OutcomeStatus, PersonaOutcome};
pub use architect::{LlmArchitect, ReportSynthesizer, SynthesisError};
pub use config::{ConfigError, EngineConfig};
pub use model::{LanguageModel, LlmError};
pub use ollama::OllamaClient;
pub use personas::{default_personas, Persona};
pub use session::{
    Delivery, EventKind, LogEvent, SessionError, SessionManager, SessionRequest, SessionStatus,
};
pub use toolbelt::{Observation, Toolbelt};
