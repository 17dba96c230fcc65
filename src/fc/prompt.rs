use std::fmt::Write as _;

use crate::fc::parser::PRIMARY_DIALECT;
use crate::protocol::canonical::{ToolChoice, ToolSpec};
use crate::util::{push_json_string_escaped, truncate_chars};

/// Closing tag of the primary dialect; the backend stops generation on it.
pub const SENTINEL_STOP: &str = PRIMARY_DIALECT.close_tag();

/// Fixed closing section of every tool block.
pub const SYNTAX_INSTRUCTIONS: &str = r#"## How to call tools
To call a tool, write a block in exactly this form, on its own line:
<tool_call>{"name": "TOOL_NAME", "parameters": {"ARGUMENT": "VALUE"}}</tool_call>
Rules:
- The content between the tags must be a single JSON object with "name" and "parameters".
- Use only tool names and parameter keys listed above, spelled exactly as shown.
- Escape quotes and line breaks inside JSON strings.
- To call several tools, write one <tool_call> block per call.
- Stop writing after your last </tool_call>; the results will be sent back to you."#;

/// Build the tool description block appended to the prompt.
///
/// Returns `None` when no tools are declared.
#[must_use]
pub fn build_tool_prompt(
    tools: &[ToolSpec],
    choice: &ToolChoice,
    max_description_chars: usize,
) -> Option<String> {
    if tools.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(512 * tools.len() + SYNTAX_INSTRUCTIONS.len());
    out.push_str("# Available tools\n\nYou can use the following tools.\n");
    for tool in tools {
        out.push('\n');
        format_tool_section(&mut out, tool, max_description_chars);
    }

    if let Some(policy) = tool_choice_instruction(choice) {
        out.push_str("\n## Tool use policy\n");
        out.push_str(&policy);
        out.push('\n');
    }

    out.push('\n');
    out.push_str(SYNTAX_INSTRUCTIONS);
    Some(out)
}

fn format_tool_section(out: &mut String, tool: &ToolSpec, max_description_chars: usize) {
    let _ = writeln!(out, "## Tool: {}", tool.name);
    match tool.description.as_deref().map(str::trim) {
        Some(desc) if !desc.is_empty() => {
            let _ = writeln!(
                out,
                "Description: {}",
                truncate_chars(desc, max_description_chars)
            );
        }
        _ => {}
    }

    let schema = &tool.input_schema;
    let required: Vec<&str> = schema
        .get("required")
        .and_then(serde_json::Value::as_array)
        .map(|arr| arr.iter().filter_map(serde_json::Value::as_str).collect())
        .unwrap_or_default();

    match schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .filter(|props| !props.is_empty())
    {
        None => out.push_str("Parameters: none\n"),
        Some(props) => {
            out.push_str("Parameters:\n");
            for (name, info) in props {
                format_param_line(out, name, info, required.contains(&name.as_str()));
            }
        }
    }
}

/// One line per parameter: name, type, required flag, then any hints.
fn format_param_line(out: &mut String, name: &str, info: &serde_json::Value, required: bool) {
    let p_type = param_type(info);
    let flag = if required { "required" } else { "optional" };
    let _ = write!(out, "- {name} ({p_type}, {flag})");

    if let Some(desc) = info.get("description").and_then(serde_json::Value::as_str) {
        let desc = desc.trim();
        if !desc.is_empty() {
            let _ = write!(out, ": {}", desc.replace('\n', " "));
        }
    }
    if let Some(values) = info.get("enum") {
        let _ = write!(out, " Allowed values: {values}.");
    }
    if let Some(default) = info.get("default") {
        let _ = write!(out, " Default: {default}.");
    }
    out.push('\n');
}

fn param_type(info: &serde_json::Value) -> String {
    match info.get("type") {
        Some(serde_json::Value::String(t)) if t == "array" => {
            match info
                .get("items")
                .and_then(|items| items.get("type"))
                .and_then(serde_json::Value::as_str)
            {
                Some(item) => format!("array of {item}"),
                None => "array".to_string(),
            }
        }
        Some(serde_json::Value::String(t)) => t.clone(),
        // Union types such as ["string", "null"].
        Some(serde_json::Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(serde_json::Value::as_str).collect();
            if names.is_empty() {
                "any".to_string()
            } else {
                names.join(" | ")
            }
        }
        _ => "any".to_string(),
    }
}

fn tool_choice_instruction(choice: &ToolChoice) -> Option<String> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::Any => Some(
            "You MUST call at least one of the tools above in this response.".to_string(),
        ),
        ToolChoice::None => Some(
            "Do NOT call any tools in this response. Answer with plain text only.".to_string(),
        ),
        ToolChoice::Tool(name) => Some(format!(
            "You MUST call the tool \"{name}\" in this response."
        )),
    }
}

/// Render a past call in the primary dialect, as the model itself would.
#[must_use]
pub fn render_tool_call(id: &str, name: &str, input: &serde_json::Value) -> String {
    let mut out = String::with_capacity(64 + name.len());
    out.push_str("<tool_call id=\"");
    out.push_str(id);
    out.push_str("\">{\"name\": ");
    push_json_string_escaped(&mut out, name);
    out.push_str(", \"parameters\": ");
    out.push_str(&input.to_string());
    out.push('}');
    out.push_str(SENTINEL_STOP);
    out
}
