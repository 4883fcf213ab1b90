//! Tool namespaces rendered as TypeScript-like declarations.
//!
//! ```text
//! ## functions
//!
//! namespace functions {
//!
//! // Gets the current weather.
//! type get_current_weather = (_: {
//! // The city and state, e.g. San Francisco, CA
//! location: string,
//! format?: "celsius" | "fahrenheit", // default: celsius
//! }) => any;
//!
//! } // namespace functions
//! ```

use serde_json::{Map, Value};

use crate::chat::{ToolDescription, ToolNamespaceConfig};

/// Renders one namespace and all of its tools.
pub fn render_namespace(namespace: &ToolNamespaceConfig) -> String {
    let mut out = format!("## {}\n\n", namespace.name);
    if let Some(description) = &namespace.description {
        out.push_str(description);
        out.push_str("\n\n");
    }
    out.push_str(&format!("namespace {} {{\n\n", namespace.name));
    for tool in &namespace.tools {
        render_tool(tool, &mut out);
    }
    out.push_str(&format!("}} // namespace {}", namespace.name));
    out
}

fn render_tool(tool: &ToolDescription, out: &mut String) {
    for line in tool.description.lines() {
        out.push_str(&format!("// {line}\n"));
    }
    match tool.parameters.as_ref().filter(|p| has_properties(p)) {
        Some(schema) => {
            out.push_str(&format!("type {} = (_: ", tool.name));
            out.push_str(&object_type(schema, 0));
            out.push_str(") => any;\n\n");
        }
        None => out.push_str(&format!("type {} = () => any;\n\n", tool.name)),
    }
}

/// Converts a JSON schema to a TypeScript type expression.
pub fn schema_to_typescript(schema: &Value) -> String {
    type_expr(schema, 0)
}

fn has_properties(schema: &Value) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty())
}

fn type_expr(schema: &Value, depth: usize) -> String {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        return values.iter().map(literal).collect::<Vec<_>>().join(" | ");
    }
    if let Some(value) = schema.get("const") {
        return literal(value);
    }
    for key in ["oneOf", "anyOf"] {
        if let Some(variants) = schema.get(key).and_then(Value::as_array) {
            return variants
                .iter()
                .map(|v| type_expr(v, depth))
                .collect::<Vec<_>>()
                .join(" | ");
        }
    }

    match schema.get("type") {
        Some(Value::String(name)) => named_type(name, schema, depth),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(|name| named_type(name, schema, depth))
            .collect::<Vec<_>>()
            .join(" | "),
        _ if has_properties(schema) => object_type(schema, depth),
        _ => "any".to_string(),
    }
}

fn named_type(name: &str, schema: &Value, depth: usize) -> String {
    match name {
        "string" => "string".to_string(),
        "number" | "integer" => "number".to_string(),
        "boolean" => "boolean".to_string(),
        "null" => "null".to_string(),
        "array" => match schema.get("items") {
            Some(items) => {
                let item = type_expr(items, depth);
                if item.contains(" | ") {
                    format!("({item})[]")
                } else {
                    format!("{item}[]")
                }
            }
            None => "any[]".to_string(),
        },
        "object" if has_properties(schema) => object_type(schema, depth),
        "object" => "object".to_string(),
        _ => "any".to_string(),
    }
}

/// Renders `{ ... }` with one property per line. Keys come out sorted.
fn object_type(schema: &Value, depth: usize) -> String {
    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let indent = "  ".repeat(depth);
    let mut out = String::from("{\n");
    for (name, property) in properties {
        if let Some(description) = property.get("description").and_then(Value::as_str) {
            for line in description.lines() {
                out.push_str(&format!("{indent}// {line}\n"));
            }
        }
        let optional = if required.contains(&name.as_str()) { "" } else { "?" };
        out.push_str(&format!(
            "{indent}{name}{optional}: {},",
            type_expr(property, depth + 1)
        ));
        if let Some(default) = property.get("default") {
            out.push_str(&format!(" // default: {}", default_text(default)));
        }
        out.push('\n');
    }
    out.push_str(&indent);
    out.push('}');
    out
}

fn literal(value: &Value) -> String {
    value.to_string()
}

fn default_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
