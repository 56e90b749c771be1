use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tracing::info;

use super::{implicit_title, like_pattern, ChatStore, ProductCatalog};
use crate::error::StoreError;
use crate::types::{now_millis, Message, Product, Role, SessionInfo, ToolCall, HISTORY_LIMIT};

const MESSAGE_COLUMNS: &str = "id, role, content, timestamp, tool_calls, tool_call_id";
const PRODUCT_COLUMNS: &str = "id, name, description, price, stock_quantity, category, metadata";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("connected to postgres and applied migrations");
        Ok(Self { pool })
    }
}

fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn parse_json_text(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or(Value::Null)
}

fn parse_message_row(row: &PgRow) -> Result<Message, StoreError> {
    let role: String = row.try_get("role")?;
    let tool_calls = row
        .try_get::<Option<String>, _>("tool_calls")?
        .map(|raw| serde_json::from_str::<Vec<ToolCall>>(&raw))
        .transpose()?;
    Ok(Message {
        id: row.try_get("id")?,
        // rows are only ever written from a `Role`
        role: Role::parse(&role).unwrap_or(Role::System),
        content: row.try_get("content")?,
        timestamp: row.try_get("timestamp")?,
        tool_calls,
        tool_call_id: row.try_get("tool_call_id")?,
    })
}

fn parse_product_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        stock_quantity: row.try_get("stock_quantity")?,
        category: row.try_get("category")?,
        metadata: parse_json_text(&row.try_get::<String, _>("metadata")?),
    })
}

fn parse_session_row(row: &PgRow) -> Result<SessionInfo, StoreError> {
    Ok(SessionInfo {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        last_active: row.try_get("last_active")?,
    })
}

#[async_trait]
impl ChatStore for PgStore {
    async fn get_last(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chatlog WHERE session_id = $1 \
             ORDER BY timestamp DESC, seq DESC LIMIT $2"
        ))
        .bind(session_id)
        .bind(HISTORY_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(parse_message_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        for message in messages {
            let tool_calls = message
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO chatlog (id, session_id, role, content, timestamp, tool_calls, tool_call_id)
                VALUES ($1,$2,$3,$4,$5,$6,$7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&message.id)
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp)
            .bind(tool_calls)
            .bind(&message.tool_call_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO sessions (id, title, created_at, last_active)
            VALUES ($1,$2,$3,$3)
            ON CONFLICT (id) DO UPDATE SET last_active = EXCLUDED.last_active
            "#,
        )
        .bind(session_id)
        .bind(implicit_title(messages, now))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM chatlog WHERE seq IN (
                SELECT seq FROM (
                    SELECT seq, ROW_NUMBER() OVER (ORDER BY timestamp DESC, seq DESC) AS rn
                    FROM chatlog WHERE session_id = $1
                ) ranked WHERE rn > $2
            )
            "#,
        )
        .bind(session_id)
        .bind(HISTORY_LIMIT as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, last_active FROM sessions ORDER BY last_active DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_session_row).collect()
    }

    async fn create_session(&self, session: SessionInfo) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, title, created_at, last_active) VALUES ($1,$2,$3,$4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(session.created_at)
        .bind(session.last_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chatlog WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_all_sessions(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chatlog").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn system_prompt(&self) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM kv_store WHERE key = 'system_prompt'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_system_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES ('system_prompt', $1) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products_info ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_product_row).collect()
    }

    async fn create_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products_info (id, name, description, price, stock_quantity, category, metadata) \
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock_quantity)
        .bind(&product.category)
        .bind(json_text(&product.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products_info SET name=$1, description=$2, price=$3, stock_quantity=$4, \
             category=$5, metadata=$6 WHERE id=$7",
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.stock_quantity)
        .bind(&product.category)
        .bind(json_text(&product.metadata))
        .bind(&product.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_product(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM products_info WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_products(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        let pattern = like_pattern(query);
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products_info \
             WHERE (name ILIKE $1 ESCAPE '\\' OR description ILIKE $1 ESCAPE '\\' \
                    OR category ILIKE $1 ESCAPE '\\') \
               AND ($2::TEXT IS NULL OR LOWER(category) = LOWER($2)) \
             ORDER BY name LIMIT $3"
        ))
        .bind(pattern)
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_product_row).collect()
    }
}
