use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Number of messages kept per session, both in storage and in the prompt.
pub const HISTORY_LIMIT: usize = 20;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Option<String>,
    pub timestamp: i64,
    #[serde(
        default,
        rename = "toolCalls",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: Some(content.into()),
            timestamp: now_millis(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A tool invocation requested by the model, together with what it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub last_active: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
    pub uploaded: String,
}

/// Chat request body. Read from loose JSON: a non-string `message` or
/// `model` counts as absent and `stream` follows JavaScript truthiness.
#[derive(Debug, Default)]
pub struct ChatBody {
    pub message: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
}

impl ChatBody {
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            message: text("message"),
            model: text("model"),
            stream: value.get("stream").is_some_and(is_truthy),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub first_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductBody {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ProductBody {
    pub fn into_product(self, id: String) -> Product {
        Product {
            id,
            name: self.name,
            description: self.description,
            price: self.price,
            stock_quantity: self.stock_quantity,
            category: self.category,
            metadata: self
                .metadata
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SystemPromptBody {
    #[serde(default)]
    pub prompt: Value,
}
