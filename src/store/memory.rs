use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{implicit_title, product_matches, prune_window, ChatStore, ProductCatalog};
use crate::error::StoreError;
use crate::types::{now_millis, Message, Product, SessionInfo};

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
    system_prompt: RwLock<Option<String>>,
    products: RwLock<HashMap<String, Product>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_last(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, new_messages: &[Message]) -> Result<(), StoreError> {
        if new_messages.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        {
            let mut messages = self.messages.write().await;
            let window = messages.entry(session_id.to_string()).or_default();
            window.extend(new_messages.iter().cloned());
            prune_window(window);
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .and_modify(|s| s.last_active = now)
            .or_insert_with(|| SessionInfo {
                id: session_id.to_string(),
                title: implicit_title(new_messages, now),
                created_at: now,
                last_active: now,
            });
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut list = sessions.values().cloned().collect::<Vec<_>>();
        list.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(list)
    }

    async fn create_session(&self, session: SessionInfo) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.id.clone()).or_insert(session);
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        self.messages.write().await.remove(session_id);
        Ok(())
    }

    async fn delete_all_sessions(&self) -> Result<(), StoreError> {
        self.sessions.write().await.clear();
        self.messages.write().await.clear();
        Ok(())
    }

    async fn system_prompt(&self) -> Result<Option<String>, StoreError> {
        Ok(self.system_prompt.read().await.clone())
    }

    async fn set_system_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        *self.system_prompt.write().await = Some(prompt.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let products = self.products.read().await;
        let mut list = products.values().cloned().collect::<Vec<_>>();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn create_product(&self, product: &Product) -> Result<(), StoreError> {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<bool, StoreError> {
        let mut products = self.products.write().await;
        match products.get_mut(&product.id) {
            Some(existing) => {
                *existing = product.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_product(&self, id: &str) -> Result<(), StoreError> {
        self.products.write().await.remove(id);
        Ok(())
    }

    async fn search_products(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        let mut found = self
            .list_products()
            .await?
            .into_iter()
            .filter(|p| product_matches(p, query, category))
            .collect::<Vec<_>>();
        found.truncate(limit);
        Ok(found)
    }
}
