//! Agent module for persona-driven API exploration
//!
//! This module provides the loop that drives one persona:
//! - Prompt construction from persona, goal and memory
//! - Parsing of free-text model output into a decision
//! - Dispatch through the toolbelt and recording of the observation
//!
//! # Architecture
//!
//! ```text
//! Persona + Goal + Memory → build_prompt → LanguageModel::complete
//!                                               ↓
//!                                        parse_decision
//!                                               ↓
//!                                  Toolbelt::use_tool → target API
//!                                               ↓
//!                          Memory += decision, observation → Loop or Complete
//! ```

pub mod controller;
pub mod memory;
pub mod parser;

pub use controller::{
    Agent, AgentConfig, OutcomeStatus, ParseFailurePolicy, PersonaOutcome, CHECKOUT_CONFIRMATIONS,
    PARSE_FAILURE_POLICY,
};
pub use memory::{build_prompt, Memory, Role, Turn};
pub use parser::{parse_decision, Decision, MalformedResponse};
