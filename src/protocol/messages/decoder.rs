use crate::error::BridgeError;
use crate::protocol::canonical::{
    ContentBlock, Message, RequestContext, ThinkingConfig, ToolChoice,
};
use crate::protocol::mapping::role_from_wire;
use crate::protocol::messages::{MessagesRequest, RequestMetadata};
use crate::state::{ConversationState, SessionHints};

/// Parse a Messages API request into a [`RequestContext`].
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when the model is blank or the
/// request carries no messages.
pub fn decode_messages_request(request: MessagesRequest) -> Result<RequestContext, BridgeError> {
    let MessagesRequest {
        model,
        max_tokens,
        system,
        messages: wire_messages,
        tools,
        tool_choice,
        stop_sequences,
        thinking,
        metadata,
        stream: _,
        extra,
    } = request;

    if model.trim().is_empty() {
        return Err(BridgeError::InvalidRequest("model must not be empty".into()));
    }
    if wire_messages.is_empty() {
        return Err(BridgeError::InvalidRequest(
            "messages must not be empty".into(),
        ));
    }

    let messages = wire_messages
        .into_iter()
        .map(|msg| Message {
            role: role_from_wire(&msg.role),
            content: decode_content_value(msg.content),
        })
        .collect();

    let mut ctx = RequestContext::new(model, messages);
    ctx.system_prompt = decode_system_prompt(system);
    ctx.tools = tools.unwrap_or_default();
    ctx.tool_choice = tool_choice.as_ref().map_or(ToolChoice::Auto, decode_tool_choice);
    ctx.max_tokens = max_tokens;
    ctx.stop_sequences = stop_sequences.unwrap_or_default();
    ctx.thinking = thinking.as_ref().and_then(decode_thinking);
    ctx.passthrough = extra
        .get("passthrough")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    ctx.conversation = metadata.as_ref().and_then(conversation_hints);
    Ok(ctx)
}

/// Session id hints from the request metadata plus the host's header value.
#[must_use]
pub fn session_hints(metadata: Option<&RequestMetadata>, header: Option<&str>) -> SessionHints {
    SessionHints {
        header: header.map(str::to_string),
        metadata_session_id: metadata.and_then(|m| m.session_id.clone()),
        metadata_user_id: metadata.and_then(|m| m.user_id.clone()),
    }
}

fn conversation_hints(metadata: &RequestMetadata) -> Option<ConversationState> {
    let state = ConversationState {
        conversation_id: metadata.conversation_id.clone(),
        last_assistant_message_id: metadata.parent_message_id.clone(),
        system_prompt: None,
    };
    (!state.is_empty()).then_some(state)
}

/// Decode a content JSON value (string or array of blocks).
///
/// Blocks of unknown type are skipped.
fn decode_content_value(content: serde_json::Value) -> Vec<ContentBlock> {
    match content {
        serde_json::Value::String(s) => vec![ContentBlock::Text { text: s }],
        serde_json::Value::Array(blocks) => blocks
            .into_iter()
            .filter_map(|block| match serde_json::from_value::<ContentBlock>(block) {
                Ok(block) => Some(block),
                Err(err) => {
                    tracing::debug!("skipping undecodable content block: {}", err);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_system_prompt(system: Option<serde_json::Value>) -> Option<String> {
    let system = system?;
    match system {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Array(blocks) => {
            let mut texts: Vec<String> = Vec::new();
            for block in blocks {
                let serde_json::Value::Object(mut obj) = block else {
                    continue;
                };
                if obj.get("type").and_then(|t| t.as_str()) != Some("text") {
                    continue;
                }
                if let Some(serde_json::Value::String(text)) = obj.remove("text") {
                    texts.push(text);
                }
            }
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

fn decode_tool_choice(value: &serde_json::Value) -> ToolChoice {
    let kind = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(obj) => obj.get("type").and_then(|t| t.as_str()).unwrap_or("auto"),
        _ => "auto",
    };
    match kind {
        "any" | "required" => ToolChoice::Any,
        "none" => ToolChoice::None,
        "tool" => value
            .get("name")
            .and_then(|n| n.as_str())
            .map_or(ToolChoice::Any, |name| ToolChoice::Tool(name.to_string())),
        _ => ToolChoice::Auto,
    }
}

fn decode_thinking(value: &serde_json::Value) -> Option<ThinkingConfig> {
    match value {
        serde_json::Value::Bool(enabled) => Some(ThinkingConfig {
            enabled: *enabled,
            budget_tokens: None,
        }),
        serde_json::Value::Object(obj) => {
            let enabled = match obj.get("type").and_then(|t| t.as_str()) {
                Some("enabled") => true,
                Some(_) => false,
                None => obj
                    .get("enabled")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true),
            };
            Some(ThinkingConfig {
                enabled,
                budget_tokens: obj.get("budget_tokens").and_then(serde_json::Value::as_u64),
            })
        }
        _ => None,
    }
}
