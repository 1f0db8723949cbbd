//! Text rendering of model metadata.

use comfy_table::{presets, ContentArrangement, Table};
use serde_json::Value;

use super::table::{format_cell, TwoDimTable};

/// Render a model description for display.
///
/// Prints a `Model Details:` header and a two-column table with one row
/// per `output` field that has help text, skipping `help` itself and
/// fields whose name starts with `_`. Fields holding a two-dimensional
/// table are drawn as their own tables below it. Output depends only on
/// `metadata`.
pub fn render(metadata: &Value) -> String {
    let output = metadata.get("output").unwrap_or(&Value::Null);
    let help = output.get("help").and_then(Value::as_object);

    let mut details = Table::new();
    details
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Disabled);
    let mut has_details = false;
    let mut tables = Vec::new();

    if let (Some(fields), Some(help)) = (output.as_object(), help) {
        for (name, value) in fields {
            if name == "help" || name.starts_with('_') {
                continue;
            }
            let Some(label) = help.get(name) else {
                continue;
            };
            match TwoDimTable::from_value(value) {
                Some(table) => tables.push(table),
                None => {
                    details.add_row(vec![format!("{}:", format_cell(label)), format_cell(value)]);
                    has_details = true;
                }
            }
        }
    }

    let mut rendered = String::from("Model Details:\n");
    if let Some(key) = metadata.pointer("/model_id/name").and_then(Value::as_str) {
        rendered.push_str(&format!("Model Key: {}\n", key));
    }
    if let Some(algo) = metadata.get("algo").and_then(Value::as_str) {
        rendered.push_str(&format!("Algorithm: {}\n", algo));
    }
    if has_details {
        rendered.push_str(&details.to_string());
        rendered.push('\n');
    }
    for table in tables {
        rendered.push('\n');
        rendered.push_str(&table.render());
        rendered.push('\n');
    }
    rendered
}
