//! Report synthesis boundary
//!
//! Once every persona has finished, the session hands all outcomes to a
//! [`ReportSynthesizer`]. The default implementation asks the language model
//! for a Markdown report and returns it verbatim.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::PersonaOutcome;
use crate::model::{LanguageModel, LlmError};

/// Report generation failed
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("report model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("report generation timed out")]
    Timeout,
    #[error("report model returned an empty report")]
    EmptyReport,
}

/// Turns the outcomes of a session into a report
#[async_trait]
pub trait ReportSynthesizer: Send + Sync {
    async fn synthesize(&self, goal: &str, outcomes: &[PersonaOutcome]) -> Result<String, SynthesisError>;
}

/// LLM-backed report writer
pub struct LlmArchitect {
    llm: Arc<dyn LanguageModel>,
}

impl LlmArchitect {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ReportSynthesizer for LlmArchitect {
    async fn synthesize(&self, goal: &str, outcomes: &[PersonaOutcome]) -> Result<String, SynthesisError> {
        let prompt = report_prompt(goal, outcomes);
        let report = self.llm.complete(&prompt).await?;
        let report = report.trim();
        if report.is_empty() {
            return Err(SynthesisError::EmptyReport);
        }
        Ok(report.to_string())
    }
}

/// Prompt asking for the executive report
pub fn report_prompt(goal: &str, outcomes: &[PersonaOutcome]) -> String {
    let mut raw_logs = String::new();
    for outcome in outcomes {
        raw_logs.push_str(&format!(
            "\n--- START LOG: {} (Outcome: {:?}, Steps: {}, Success: {}) ---\n",
            outcome.persona_name,
            outcome.status,
            outcome.steps,
            outcome.goal_achieved
        ));
        raw_logs.push_str(&serde_json::to_string_pretty(&outcome.transcript).unwrap_or_default());
        raw_logs.push_str(&format!("\nSummary: {}", outcome.summary));
        raw_logs.push_str(&format!("\n--- END LOG: {} ---\n", outcome.persona_name));
    }

    format!(
        r#"You are a principal product manager analyzing the results of an automated API test.
The overall goal of the test was: "{goal}"

Multiple AI agents, each with a different persona, attempted this goal.
Below are the raw JSON logs of their thought processes and actions.

<RAW_LOGS>
{raw_logs}
</RAW_LOGS>

Your task is to analyze these logs and generate a concise, insightful report for a busy executive.
The report should be in Markdown format and have the following sections:

### Executive Summary
A 2-3 sentence overview of the test results. Did the agents generally succeed or fail? What was the most significant finding?

### Key Findings & Actionable Insights
A bulleted list of the 3-5 most critical issues discovered across all personas. For each issue, briefly explain the problem and suggest a concrete action for the engineering team.

### Persona Deep Dive
Briefly summarize the experience of 2-3 key personas, highlighting how their unique personality led to different outcomes."#,
        goal = goal,
        raw_logs = raw_logs,
    )
}
