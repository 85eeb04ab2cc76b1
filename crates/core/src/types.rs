use serde::{Deserialize, Serialize};

/// Unique identifier for an integration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegrationId(pub String);

impl IntegrationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IntegrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An external API definition that owns zero or more tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "baseURL", alias = "base_url")]
    pub base_url: String,
}

impl Integration {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: IntegrationId::new(id),
            name: name.into(),
            description: String::new(),
            base_url: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// A named, independently invocable capability owned by one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", alias = "input_schema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
        }
    }

    pub fn with_input_schema(mut self, input_schema: serde_json::Value) -> Self {
        self.input_schema = input_schema;
        self
    }
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_serializes_camel_case_schema() {
        let tool = Tool::new("send_email", "Send an email");
        let value = serde_json::to_value(&tool).unwrap();

        assert_eq!(value["name"], "send_email");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn test_integration_accepts_both_base_url_spellings() {
        let camel: Integration = serde_json::from_value(serde_json::json!({
            "id": "gmail",
            "name": "GMAIL",
            "baseURL": "https://gmail.googleapis.com"
        }))
        .unwrap();
        let snake: Integration = serde_json::from_value(serde_json::json!({
            "id": "gmail",
            "name": "GMAIL",
            "base_url": "https://gmail.googleapis.com"
        }))
        .unwrap();

        assert_eq!(camel, snake);
        assert_eq!(camel.id.to_string(), "gmail");
    }
}
