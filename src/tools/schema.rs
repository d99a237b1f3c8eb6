// Input validation against a tool's declared JSON schema

use anyhow::{anyhow, Result};
use jsonschema::Validator;
use serde_json::Value;

/// Compile a tool's input schema once, at registration
pub fn compile(schema: &Value) -> Result<Validator> {
    jsonschema::draft202012::options()
        .build(schema)
        .map_err(|e| anyhow!("invalid input schema: {}", e))
}

/// Every violation, each prefixed with the offending location
pub fn violations(validator: &Validator, input: &Value) -> Vec<String> {
    validator
        .iter_errors(input)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{}: {}", path, error)
            }
        })
        .collect()
}
