//! Personas the agent can role-play
//!
//! A persona is supplied by the caller (usually produced by an external
//! persona generator). Two hand-written personas ship as defaults for demos
//! and smoke tests.

use serde::{Deserialize, Serialize};

/// A configured role: a name plus the system prompt that sets its voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

const CASUAL_SHOPPER_PROMPT: &str = "You are Casey, a casual online shopper. You are not very technical.
You expect things to just work easily. You are patient but get confused by inconsistent or unexpected behavior.
You are moderately budget-conscious and don't like surprises when it comes to cost.
Your goal is to complete your task, but your primary function is to provide feedback on your experience from a non-technical perspective.
Critique anything that is confusing, slow, or doesn't work the way you'd expect.";

const POWER_USER_PROMPT: &str = "You are Paula, a senior software developer testing a new API. You value efficiency, consistency, and security above all else.
You have no patience for slow endpoints or inconsistent API responses.
You have a keen eye for security vulnerabilities and poor API design.
Your goal is to aggressively test the limits of the API.
Your critique should be technical, sharp, and identify specific design flaws.";

/// Non-technical shopper, trips over case-sensitive search and hidden fees
pub fn casual_shopper() -> Persona {
    Persona::new("Casual Casey", CASUAL_SHOPPER_PROMPT)
}

/// Senior developer, hunts for inconsistency, slowness and leaky errors
pub fn power_user() -> Persona {
    Persona::new("Power-User Paula", POWER_USER_PROMPT)
}

/// The built-in persona set
pub fn default_personas() -> Vec<Persona> {
    vec![casual_shopper(), power_user()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_personas_are_distinct() {
        let personas = default_personas();
        assert_eq!(personas.len(), 2);
        assert_ne!(personas[0].name, personas[1].name);
        assert!(personas.iter().all(|p| !p.system_prompt.is_empty()));
    }

    #[test]
    fn test_persona_round_trips_through_json() {
        let json = serde_json::json!({"name": "Casual Casey", "system_prompt": "be casual"});
        let persona: Persona = serde_json::from_value(json).unwrap();
        assert_eq!(persona, Persona::new("Casual Casey", "be casual"));
    }
}
