//! The closed set of tools an agent may call
//!
//! Tool names coming from the model are resolved through `TOOL_TABLE`; the
//! parameters are then validated into a typed `ToolCall` before any request
//! is made.

use reqwest::Method;
use serde_json::{json, Map, Value};

/// Failure to turn a model's tool choice into an executable call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("Tool '{0}' not found")]
    UnknownTool(String),
    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParameters { tool: &'static str, reason: String },
}

/// Every tool the agent knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GetProducts,
    SearchProducts,
    AddToCart,
    GetCart,
    GetProductTotalCost,
    Checkout,
    /// Reserved terminal action, never reaches the target API
    Finish,
}

/// Name, kind and prompt description of each tool
const TOOL_TABLE: &[(&str, ToolKind, &str)] = &[
    ("get_products", ToolKind::GetProducts, "get_products(): Lists all available products."),
    (
        "search_products",
        ToolKind::SearchProducts,
        "search_products(q: str): Searches for products by a query string.",
    ),
    (
        "add_to_cart",
        ToolKind::AddToCart,
        "add_to_cart(item_id: int, quantity: int): Adds a specific product to the cart.",
    ),
    ("get_cart", ToolKind::GetCart, "get_cart(): Retrieves the current contents of the shopping cart."),
    (
        "get_product_total_cost",
        ToolKind::GetProductTotalCost,
        "get_product_total_cost(product_id: int): Gets the full cost of a single product, including all fees.",
    ),
    (
        "checkout",
        ToolKind::Checkout,
        "checkout(shipping_address: str, billing_address: str): Attempts to complete the purchase.",
    ),
    (
        "finish",
        ToolKind::Finish,
        "finish(summary: str): Declares that you are done. Use it once the goal is achieved or you are certain it cannot be.",
    ),
];

/// Name of the reserved completion action
pub const FINISH_TOOL: &str = "finish";

impl ToolKind {
    /// Resolve a model-supplied tool name
    pub fn resolve(name: &str) -> Result<Self, ToolDispatchError> {
        TOOL_TABLE
            .iter()
            .find(|(n, _, _)| *n == name.trim())
            .map(|(_, kind, _)| *kind)
            .ok_or_else(|| ToolDispatchError::UnknownTool(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        TOOL_TABLE
            .iter()
            .find(|(_, kind, _)| *kind == self)
            .map(|(n, _, _)| *n)
            .unwrap_or("unknown")
    }

    /// Validate raw parameters into a typed call
    pub fn bind(self, params: &Map<String, Value>) -> Result<ToolCall, ToolDispatchError> {
        let tool = self.name();
        Ok(match self {
            ToolKind::GetProducts => ToolCall::GetProducts,
            ToolKind::GetCart => ToolCall::GetCart,
            ToolKind::SearchProducts => ToolCall::SearchProducts {
                q: required_str(tool, params, "q")?,
            },
            ToolKind::AddToCart => {
                let item_id = required_int(tool, params, "item_id")?;
                let quantity = match params.get("quantity") {
                    None | Some(Value::Null) => 1,
                    Some(v) => as_int(v).ok_or_else(|| invalid(tool, "quantity must be an integer"))?,
                };
                if quantity < 1 {
                    return Err(invalid(tool, "quantity must be at least 1"));
                }
                ToolCall::AddToCart { item_id, quantity }
            }
            ToolKind::GetProductTotalCost => ToolCall::GetProductTotalCost {
                product_id: required_int(tool, params, "product_id")?,
            },
            ToolKind::Checkout => ToolCall::Checkout {
                shipping_address: required_str(tool, params, "shipping_address")?,
                billing_address: required_str(tool, params, "billing_address")?,
            },
            ToolKind::Finish => ToolCall::Finish {
                summary: params
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        })
    }
}

/// Descriptions of every tool, one per line, for the agent prompt
pub fn tool_descriptions() -> String {
    TOOL_TABLE
        .iter()
        .map(|(_, _, description)| *description)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    GetProducts,
    SearchProducts { q: String },
    AddToCart { item_id: i64, quantity: i64 },
    GetCart,
    GetProductTotalCost { product_id: i64 },
    Checkout { shipping_address: String, billing_address: String },
    Finish { summary: Option<String> },
}

/// The HTTP request a tool call maps to
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::GetProducts => ToolKind::GetProducts,
            ToolCall::SearchProducts { .. } => ToolKind::SearchProducts,
            ToolCall::AddToCart { .. } => ToolKind::AddToCart,
            ToolCall::GetCart => ToolKind::GetCart,
            ToolCall::GetProductTotalCost { .. } => ToolKind::GetProductTotalCost,
            ToolCall::Checkout { .. } => ToolKind::Checkout,
            ToolCall::Finish { .. } => ToolKind::Finish,
        }
    }

    /// The request this call issues, `None` for actions handled locally
    pub fn request(&self) -> Option<HttpRequest> {
        Some(match self {
            ToolCall::GetProducts => HttpRequest::get("/products"),
            ToolCall::SearchProducts { q } => {
                let mut req = HttpRequest::get("/search");
                req.query.push(("q", q.clone()));
                req
            }
            ToolCall::AddToCart { item_id, quantity } => HttpRequest::post(
                "/cart/add",
                json!({"item_id": item_id, "quantity": quantity}),
            ),
            ToolCall::GetCart => HttpRequest::get("/cart"),
            ToolCall::GetProductTotalCost { product_id } => {
                HttpRequest::get(format!("/products/{}/total_cost", product_id))
            }
            ToolCall::Checkout {
                shipping_address,
                billing_address,
            } => HttpRequest::post(
                "/checkout",
                json!({
                    "shipping_address": shipping_address,
                    "billing_address": billing_address
                }),
            ),
            ToolCall::Finish { .. } => return None,
        })
    }
}

fn invalid(tool: &'static str, reason: impl Into<String>) -> ToolDispatchError {
    ToolDispatchError::InvalidParameters {
        tool,
        reason: reason.into(),
    }
}

fn required_str(
    tool: &'static str,
    params: &Map<String, Value>,
    key: &str,
) -> Result<String, ToolDispatchError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(invalid(tool, format!("'{}' must not be empty", key))),
        Some(_) => Err(invalid(tool, format!("'{}' must be a string", key))),
        None => Err(invalid(tool, format!("missing required parameter '{}'", key))),
    }
}

fn required_int(
    tool: &'static str,
    params: &Map<String, Value>,
    key: &str,
) -> Result<i64, ToolDispatchError> {
    let value = params
        .get(key)
        .ok_or_else(|| invalid(tool, format!("missing required parameter '{}'", key)))?;
    as_int(value).ok_or_else(|| invalid(tool, format!("'{}' must be an integer", key)))
}

/// Models routinely quote numbers ("2"), so numeric strings are accepted
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
