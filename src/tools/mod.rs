//! Tools the model may call while answering a customer.
//!
//! The set is closed: every tool is a [`Tool`] variant and the registry is
//! built once at startup from configuration.

mod document_search;
mod product_lookup;
mod web_search;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::documents::DocumentStore;
use crate::error::ToolError;
use crate::store::ProductCatalog;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Convert a tool definition to the chat-completions `tools` entry format.
pub fn to_openai_tool(definition: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": definition.name,
            "description": definition.description,
            "parameters": definition.parameters,
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ProductLookup,
    DocumentSearch,
    WebSearch,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::ProductLookup, Tool::DocumentSearch, Tool::WebSearch];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::ProductLookup => "get_product_info",
            Tool::DocumentSearch => "search_documents",
            Tool::WebSearch => "web_search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Tool::ProductLookup => product_lookup::definition(),
            Tool::DocumentSearch => document_search::definition(),
            Tool::WebSearch => web_search::definition(),
        }
    }
}

/// Handles a tool needs while running.
#[derive(Clone)]
pub struct ToolContext {
    pub catalog: Arc<dyn ProductCatalog>,
    pub documents: Arc<DocumentStore>,
    pub http: reqwest::Client,
    pub serpapi_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self { tools }
    }

    /// Product lookup and document search are always available; web search
    /// only with a search API key.
    pub fn from_config(config: &Config) -> Self {
        let mut tools = vec![Tool::ProductLookup, Tool::DocumentSearch];
        if config.serpapi_key.is_some() {
            tools.push(Tool::WebSearch);
        }
        Self::new(tools)
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::definition).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Tool> {
        Tool::from_name(name).filter(|tool| self.tools.contains(tool))
    }

    pub async fn execute(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .lookup(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        debug!(tool = name, "executing tool");
        match tool {
            Tool::ProductLookup => product_lookup::run(args, ctx).await,
            Tool::DocumentSearch => document_search::run(args, ctx).await,
            Tool::WebSearch => web_search::run(args, ctx).await,
        }
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required_str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    str_arg(args, key).ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' is required")))
}

/// A positive count argument clamped to `max`; accepts numbers or numeric strings.
fn limit_arg(args: &Map<String, Value>, key: &str, default: usize, max: usize) -> usize {
    let value = match args.get(key) {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    value.filter(|n| *n > 0).unwrap_or(default).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Product;
    use uuid::Uuid;

    async fn context() -> ToolContext {
        let store = Arc::new(MemoryStore::new());
        store
            .create_product(&Product {
                id: "p1".into(),
                name: "Oolong Tea".into(),
                description: "Roasted oolong".into(),
                price: 150000.0,
                stock_quantity: 12,
                category: "tea".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        let dir = std::env::temp_dir().join(format!("support_chat_tools_{}", Uuid::new_v4()));
        let documents = DocumentStore::open(dir).await.unwrap();
        documents.put("care.txt", b"Store oolong tea in a dry place.").await.unwrap();
        ToolContext {
            catalog: store,
            documents: Arc::new(documents),
            http: reqwest::Client::new(),
            serpapi_key: None,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn names_are_unique_and_resolvable() {
        for tool in Tool::ALL {
            assert_eq!(Tool::from_name(tool.name()), Some(tool));
            assert_eq!(tool.definition().name, tool.name());
            assert_eq!(tool.definition().parameters["type"], "object");
        }
        assert_eq!(Tool::from_name("delete_everything"), None);
    }

    #[test]
    fn web_search_needs_a_key() {
        let config = Config::from_lookup(|_| None).unwrap();
        let names: Vec<&str> = ToolRegistry::from_config(&config)
            .definitions()
            .iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["get_product_info", "search_documents"]);

        let config = Config::from_lookup(|k| (k == "SERPAPI_KEY").then(|| "key".to_string())).unwrap();
        assert_eq!(ToolRegistry::from_config(&config).definitions().len(), 3);
    }

    #[test]
    fn openai_tool_shape() {
        let tool = to_openai_tool(&Tool::ProductLookup.definition());
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "get_product_info");
        assert!(tool["function"]["parameters"]["properties"].is_object());
    }

    #[test]
    fn limit_parsing() {
        let a = args(json!({"limit": 3, "big": 500, "text": "4", "zero": 0, "neg": -1}));
        assert_eq!(limit_arg(&a, "limit", 5, 20), 3);
        assert_eq!(limit_arg(&a, "big", 5, 20), 20);
        assert_eq!(limit_arg(&a, "text", 5, 20), 4);
        assert_eq!(limit_arg(&a, "zero", 5, 20), 5);
        assert_eq!(limit_arg(&a, "neg", 5, 20), 5);
        assert_eq!(limit_arg(&a, "missing", 5, 20), 5);
    }

    #[tokio::test]
    async fn product_lookup_reads_catalog() {
        let ctx = context().await;
        let registry = ToolRegistry::new(Tool::ALL.to_vec());
        let result = registry
            .execute("get_product_info", &args(json!({"query": "oolong"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["products"][0]["name"], "Oolong Tea");
        assert_eq!(result["products"][0]["inStock"], true);
    }

    #[tokio::test]
    async fn document_search_returns_snippets() {
        let ctx = context().await;
        let registry = ToolRegistry::new(Tool::ALL.to_vec());
        let result = registry
            .execute("search_documents", &args(json!({"query": "dry place"})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["results"][0]["name"], "care.txt");

        let err = registry
            .execute("search_documents", &Map::new(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        tokio::fs::remove_dir_all(ctx.documents.root()).await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_tool_is_unknown() {
        let ctx = context().await;
        let registry = ToolRegistry::new(vec![Tool::ProductLookup]);
        let err = registry
            .execute("web_search", &args(json!({"query": "weather"})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "web_search"));
    }

    #[tokio::test]
    async fn web_search_without_key_fails() {
        let ctx = context().await;
        let registry = ToolRegistry::new(Tool::ALL.to_vec());
        let err = registry
            .execute("web_search", &args(json!({"query": "weather"})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }
}
