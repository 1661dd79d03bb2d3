//! Response parser - free-text model output to a structured [`Decision`]
//!
//! Models wrap their JSON in prose, markdown fences, or leave trailing commas
//! behind. The parser digs the payload out but never invents a field: a
//! payload without `tool_name` (or `thought`) is always rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One structured action choice produced by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Model text that could not be reduced to a decision
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedResponse {
    #[error("no JSON object found in model output")]
    NoPayload,
    #[error("model output is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Parse raw model output into a decision
///
/// Fenced blocks are searched first, then the whole text. The first span
/// that parses as a JSON object is the payload; a later object is never
/// tried in its place.
pub fn parse_decision(raw: &str) -> Result<Decision, MalformedResponse> {
    let text = raw.trim();

    fenced_blocks(text)
        .into_iter()
        .chain(std::iter::once(text))
        .find_map(first_json_object)
        .map_or(Err(MalformedResponse::NoPayload), |value| {
            decision_from_value(&value)
        })
}

/// Contents of each ``` fenced block, language tag removed
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip the info string ("json", "JSON", ...) up to the end of the line
        let body_start = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
            _ => 0,
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].trim());
                rest = &body[close + 3..];
            }
            None => {
                // Unterminated fence: treat the remainder as the block
                blocks.push(body.trim());
                break;
            }
        }
    }
    blocks
}

/// First balanced `{...}` span in `text` that parses as a JSON object
///
/// Each `{` is tried as the start of a span; the matching `}` is found with
/// string and escape awareness. Spans that fail to parse are retried from the
/// next brace.
fn first_json_object(text: &str) -> Option<Value> {
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(len) = matching_brace(&text[start..]) {
            if let Some(value) = parse_object(&text[start..start + len]) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }

    None
}

/// Byte length of the balanced `{...}` span at the start of `text`
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(span: &str) -> Option<Value> {
    let parsed = serde_json::from_str::<Value>(span)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&strip_trailing_commas(span)).ok())?;
    parsed.is_object().then_some(parsed)
}

/// Remove commas that directly precede a closing `}` or `]`
fn strip_trailing_commas(span: &str) -> String {
    let chars: Vec<char> = span.chars().collect();
    let mut out = String::with_capacity(span.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn decision_from_value(value: &Value) -> Result<Decision, MalformedResponse> {
    let obj = value.as_object().ok_or(MalformedResponse::NoPayload)?;

    let thought = match obj.get("thought") {
        None | Some(Value::Null) => return Err(MalformedResponse::MissingField("thought")),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(MalformedResponse::WrongType {
                field: "thought",
                expected: "a string",
            })
        }
    };

    let tool_name = match obj.get("tool_name") {
        None | Some(Value::Null) => return Err(MalformedResponse::MissingField("tool_name")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(MalformedResponse::MissingField("tool_name"))
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(_) => {
            return Err(MalformedResponse::WrongType {
                field: "tool_name",
                expected: "a string",
            })
        }
    };

    // Some models say "arguments" instead of "parameters"
    let parameters = match obj.get("parameters").or_else(|| obj.get("arguments")) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(MalformedResponse::WrongType {
                field: "parameters",
                expected: "an object",
            })
        }
    };

    Ok(Decision {
        thought,
        tool_name,
        parameters,
    })
}
