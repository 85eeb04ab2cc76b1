pub mod apps;
pub mod unified;

pub use apps::AppsServer;
pub use unified::{UnifiedServer, EXECUTE_FUNCTION, SEARCH_FUNCTIONS};

/// Argument reserved for switching the linked account owner per call
pub const OVERRIDE_OWNER_KEY: &str = "override_linked_account_owner_id";

// Helper functions for building tool input schemas
pub(crate) mod schema {
    use serde_json::Value;

    pub fn object(properties: Value, required: Vec<&str>) -> Value {
        let mut schema = serde_json::json!({
            "type": "object",
            "properties": properties,
        });
        if !required.is_empty() {
            schema["required"] = serde_json::json!(required);
        }
        schema
    }

    pub fn string(description: &str) -> Value {
        serde_json::json!({
            "type": "string",
            "description": description
        })
    }

    pub fn array(items: Value, description: &str) -> Value {
        serde_json::json!({
            "type": "array",
            "items": items,
            "description": description
        })
    }
}
