use ferroquant_agent::{ServiceError, ToolRegistry};
use ferroquant_core::Envelope;
use serde_json::{json, Value};

use crate::cli::SchemaArgs;
use crate::error::CliError;

use super::local_envelope;

pub fn list() -> Result<Envelope<Value>, CliError> {
    let registry = ToolRegistry::new();
    let tools = registry
        .list()
        .iter()
        .map(|tool| json!({ "name": tool.name, "description": tool.description }))
        .collect::<Vec<_>>();
    local_envelope(json!({ "tools": tools }), Vec::new())
}

pub fn schema(args: &SchemaArgs) -> Result<Envelope<Value>, CliError> {
    let registry = ToolRegistry::new();
    match registry.get(args.tool.trim()) {
        Some(descriptor) => local_envelope(serde_json::to_value(descriptor)?, Vec::new()),
        None => local_envelope(
            Value::Null,
            ServiceError::UnknownTool(args.tool.clone()).envelope_errors("schema"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_tool() {
        let envelope = list().unwrap();
        let names = envelope.data["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap().to_owned())
            .collect::<Vec<_>>();
        assert!(names.contains(&String::from("price_instrument")));
        assert_eq!(names.len(), ToolRegistry::new().list().len());
    }

    #[test]
    fn unknown_schema_is_an_envelope_error() {
        let envelope = schema(&SchemaArgs {
            tool: String::from("forecast_rates"),
        })
        .unwrap();
        assert_eq!(envelope.errors[0].code, "tool.unknown");

        let known = schema(&SchemaArgs {
            tool: String::from("discount_factor"),
        })
        .unwrap();
        assert_eq!(known.data["input_schema"]["required"], json!(["curve", "dates"]));
    }
}
