//! Ollama LLM integration module
//!
//! This module provides a client for Ollama's `/api/generate` endpoint, used
//! as the default language-model backend for persona agents and for report
//! synthesis.

pub mod client;

pub use client::{GenerateResponse, OllamaClient};
