use serde_json::{json, Map, Value};

use super::{limit_arg, str_arg, ToolContext, ToolDefinition};
use crate::error::ToolError;

pub(super) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "get_product_info",
        description: "Look up products in the shop catalog by name, description or category. \
                      Returns price and stock quantity for each match.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Words to match against product name or description"
                },
                "category": {
                    "type": "string",
                    "description": "Only return products in this category (optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of products to return (default 10)"
                }
            }
        }),
    }
}

pub(super) async fn run(args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
    let query = str_arg(args, "query").unwrap_or("");
    let category = str_arg(args, "category");
    let limit = limit_arg(args, "limit", 10, 50);

    let products = ctx
        .catalog
        .search_products(query, category, limit)
        .await
        .map_err(|err| ToolError::Execution(err.to_string()))?;

    let products = products
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "description": p.description,
                "price": p.price,
                "stockQuantity": p.stock_quantity,
                "inStock": p.stock_quantity > 0,
                "category": p.category,
                "metadata": p.metadata,
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({ "count": products.len(), "products": products }))
}
