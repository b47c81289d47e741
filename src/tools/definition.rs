use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
}

/// One named argument of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            allowed: &[],
        }
    }

    pub const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            allowed: &[],
        }
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }
}

/// Contract offered to the model for a single tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [ParamSpec],
}

impl ToolDefinition {
    /// JSON-schema object describing the parameters, as function-calling APIs expect it.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in self.parameters {
            let mut property = json!({
                "type": param.kind,
                "description": param.description,
            });
            if !param.allowed.is_empty() {
                property["enum"] = json!(param.allowed);
            }
            properties.insert(param.name.to_string(), property);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
