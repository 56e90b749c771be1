//! Persistence for chat history, sessions, settings and the product catalog.
//!
//! Every store comes in two flavours with the same observable behavior: a
//! Postgres-backed one and an in-memory one used when no database is
//! configured. Handlers only ever see the traits.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Message, Product, SessionInfo, HISTORY_LIMIT};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// The most recent messages of a session, oldest first, at most
    /// [`HISTORY_LIMIT`] of them.
    async fn get_last(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Persist messages, touch (or create) the session and prune the window.
    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// Sessions ordered by most recent activity first.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StoreError>;

    /// Register a session; an existing id is left untouched.
    async fn create_session(&self, session: SessionInfo) -> Result<(), StoreError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    async fn delete_all_sessions(&self) -> Result<(), StoreError>;

    async fn system_prompt(&self) -> Result<Option<String>, StoreError>;

    async fn set_system_prompt(&self, prompt: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn create_product(&self, product: &Product) -> Result<(), StoreError>;

    /// Returns false when no product has this id.
    async fn update_product(&self, product: &Product) -> Result<bool, StoreError>;

    async fn delete_product(&self, id: &str) -> Result<(), StoreError>;

    /// Case-insensitive match of `query` against name, description and
    /// category, optionally restricted to one category.
    async fn search_products(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError>;
}

/// Title given to a session created implicitly by its first message.
pub fn title_from_first_message(text: &str) -> String {
    let trimmed = text.trim();
    let head: String = trimmed.chars().take(40).collect();
    if head.len() < trimmed.len() {
        format!("{head}...")
    } else {
        head
    }
}

/// Title for a session that has no user text to name it after.
pub fn fallback_title(now_millis: i64) -> String {
    let time = chrono::DateTime::from_timestamp_millis(now_millis)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    format!("Chat at {time}")
}

/// Title for a session created implicitly by `append`.
pub(crate) fn implicit_title(messages: &[Message], now_millis: i64) -> String {
    messages
        .iter()
        .filter(|m| m.role == crate::types::Role::User)
        .find_map(|m| m.content.as_deref().filter(|c| !c.trim().is_empty()))
        .map(title_from_first_message)
        .unwrap_or_else(|| fallback_title(now_millis))
}

/// Keep only the newest [`HISTORY_LIMIT`] messages, oldest first. Ties on
/// timestamp keep insertion order.
pub(crate) fn prune_window(messages: &mut Vec<Message>) {
    messages.sort_by_key(|m| m.timestamp);
    if messages.len() > HISTORY_LIMIT {
        let excess = messages.len() - HISTORY_LIMIT;
        messages.drain(..excess);
    }
}

pub(crate) fn product_matches(product: &Product, query: &str, category: Option<&str>) -> bool {
    if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
        if product.category.to_lowercase() != category.to_lowercase() {
            return false;
        }
    }
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    [&product.name, &product.description, &product.category]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
}

/// `ILIKE` pattern matching `query` as a literal substring.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
