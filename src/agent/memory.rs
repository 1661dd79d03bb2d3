//! Agent memory and prompt construction
//!
//! Memory is the append-only transcript of one agent run. The prompt for
//! every step is rebuilt from scratch out of the persona, the goal and the
//! full transcript; [`build_prompt`] is a pure function of those inputs.

use serde::{Deserialize, Serialize};

use crate::personas::Persona;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The model's decision for a step
    Assistant,
    /// The observation returned by the toolbelt
    ToolObservation,
    /// A step that failed before anything was dispatched
    Error,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Assistant => "assistant",
            Role::ToolObservation => "tool_observation",
            Role::Error => "error",
        }
    }
}

/// One entry in an agent's transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered, append-only transcript of one agent run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Memory {
    turns: Vec<Turn>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// History block as it appears in the prompt
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("{}:\n{}", turn.role.as_str(), turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

/// Build the prompt for the next step
pub fn build_prompt(persona: &Persona, goal: &str, tool_descriptions: &str, memory: &Memory) -> String {
    let history = if memory.is_empty() {
        "No actions taken yet.".to_string()
    } else {
        memory.render()
    };

    format!(
        r#"{system_prompt}

Your ultimate goal is: "{goal}"

You have the following tools available:
{tools}

This is the history of your actions and observations so far:
<history>
{history}
</history>

Based on your persona, the goal, and the history, what is your next step?
When you are done, use the finish tool with a short summary of your experience.
You MUST respond with a single JSON object in the following format:
{{
  "thought": "Your detailed thought process and critique of the last observation.",
  "tool_name": "The single tool you will use next.",
  "parameters": {{ "param_name": "param_value" }}
}}"#,
        system_prompt = persona.system_prompt.trim(),
        goal = goal,
        tools = tool_descriptions,
        history = history,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> Persona {
        Persona::new("Casual Casey", "You are Casey.")
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let mut memory = Memory::new();
        memory.push(Role::Assistant, r#"{"thought":"t","tool_name":"get_cart","parameters":{}}"#);
        memory.push(Role::ToolObservation, r#"{"success":true}"#);

        let a = build_prompt(&persona(), "buy a mouse", "get_cart(): cart", &memory);
        let b = build_prompt(&persona(), "buy a mouse", "get_cart(): cart", &memory.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_contains_inputs() {
        let mut memory = Memory::new();
        let empty = build_prompt(&persona(), "find a wireless mouse", "search_products(q)", &memory);
        assert!(empty.starts_with("You are Casey."));
        assert!(empty.contains("Your ultimate goal is: \"find a wireless mouse\""));
        assert!(empty.contains("search_products(q)"));
        assert!(empty.contains("No actions taken yet."));

        memory.push(Role::Error, "could not parse");
        let with_history = build_prompt(&persona(), "find a wireless mouse", "search_products(q)", &memory);
        assert!(with_history.contains("error:\ncould not parse"));
        assert!(!with_history.contains("No actions taken yet."));
    }

    #[test]
    fn test_memory_serializes_as_turn_list() {
        let mut memory = Memory::new();
        memory.push(Role::ToolObservation, "ok");
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json, serde_json::json!([{"role": "tool_observation", "content": "ok"}]));
    }
}
