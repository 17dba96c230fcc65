use memchr::memmem;

use crate::protocol::backend::{BackendEvent, DeltaPart, FinalMessage, ToolArgs};

/// Decode one backend SSE `data` payload.
///
/// Returns `None` for payloads that are not JSON or match no known shape;
/// callers skip those.
#[must_use]
pub fn parse_backend_event(data: &str) -> Option<BackendEvent> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    // Run steps can be large; there is nothing in them worth decoding.
    if is_run_step(data.as_bytes()) {
        return Some(BackendEvent::RunStep);
    }

    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let obj = value.as_object()?;

    if obj.get("final").and_then(serde_json::Value::as_bool) == Some(true) {
        let message = obj
            .get("responseMessage")
            .cloned()
            .and_then(|raw| serde_json::from_value::<FinalMessage>(raw).ok())
            .unwrap_or_default();
        return Some(BackendEvent::Final(message));
    }

    if obj.get("created").and_then(serde_json::Value::as_bool) == Some(true) {
        let message_id = obj
            .get("message")
            .and_then(|m| m.get("messageId"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        return Some(BackendEvent::Created { message_id });
    }

    match obj.get("event").and_then(serde_json::Value::as_str)? {
        "on_run_step" => Some(BackendEvent::RunStep),
        "on_message_delta" => {
            let delta = obj.get("data").and_then(|d| d.get("delta"))?;
            let content = delta
                .get("content")
                .map(parse_delta_parts)
                .unwrap_or_default();
            let thought_signature = delta
                .get("thoughtSignature")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            Some(BackendEvent::MessageDelta {
                content,
                thought_signature,
            })
        }
        _ => None,
    }
}

fn is_run_step(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(64)];
    memmem::find(head, b"\"on_run_step\"").is_some()
}

/// Decode a content value (array of parts or bare string) into delta parts.
///
/// Parts of unknown type are dropped.
#[must_use]
pub fn parse_delta_parts(content: &serde_json::Value) -> Vec<DeltaPart> {
    match content {
        serde_json::Value::String(text) if !text.is_empty() => vec![DeltaPart::Text(text.clone())],
        serde_json::Value::Array(parts) => parts.iter().filter_map(parse_delta_part).collect(),
        serde_json::Value::Object(_) => parse_delta_part(content).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_delta_part(part: &serde_json::Value) -> Option<DeltaPart> {
    let str_field = |key: &str| part.get(key).and_then(serde_json::Value::as_str);
    match str_field("type")? {
        "text" => {
            let text = str_field("text")?;
            Some(DeltaPart::Text(text.to_string()))
        }
        "think" | "thinking" | "reasoning" => {
            let text = str_field("think")
                .or_else(|| str_field("thinking"))
                .or_else(|| str_field("text"))
                .unwrap_or_default();
            let signature = str_field("signature").map(str::to_string);
            if text.is_empty() && signature.is_none() {
                return None;
            }
            Some(DeltaPart::Thinking {
                text: text.to_string(),
                signature,
            })
        }
        "tool_call" => {
            let call = part.get("tool_call")?;
            let field = |key: &str| {
                call.get(key)
                    .and_then(serde_json::Value::as_str)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let args = match call
                .get("args")
                .or_else(|| call.get("arguments"))
                .or_else(|| call.get("input"))
            {
                Some(serde_json::Value::String(fragment)) => ToolArgs::Fragment(fragment.clone()),
                Some(serde_json::Value::Null) | None => ToolArgs::None,
                Some(full) => ToolArgs::Full(full.clone()),
            };
            Some(DeltaPart::ToolCall {
                id: field("id"),
                name: field("name"),
                args,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_created_and_run_step() {
        let created = r#"{"created": true, "message": {"messageId": "m-1"}}"#;
        assert_eq!(
            parse_backend_event(created),
            Some(BackendEvent::Created {
                message_id: Some("m-1".into())
            })
        );
        let step = r#"{"event": "on_run_step", "data": {"id": "step_1", "huge": [1,2,3]}}"#;
        assert_eq!(parse_backend_event(step), Some(BackendEvent::RunStep));
    }

    #[test]
    fn test_message_delta_parts() {
        let data = json!({
            "event": "on_message_delta",
            "data": {"delta": {
                "content": [
                    {"type": "think", "think": "Plan", "signature": "sig"},
                    {"type": "text", "text": "Hello"},
                    {"type": "tool_call", "tool_call": {"id": "c1", "name": "f", "args": "{\"a\""}},
                    {"type": "tool_call", "tool_call": {"id": "c2", "args": {"a": 1}}},
                    {"type": "image_file"}
                ],
                "thoughtSignature": "top"
            }}
        })
        .to_string();
        let Some(BackendEvent::MessageDelta {
            content,
            thought_signature,
        }) = parse_backend_event(&data)
        else {
            panic!("expected delta");
        };
        assert_eq!(thought_signature.as_deref(), Some("top"));
        assert_eq!(
            content,
            vec![
                DeltaPart::Thinking {
                    text: "Plan".into(),
                    signature: Some("sig".into())
                },
                DeltaPart::Text("Hello".into()),
                DeltaPart::ToolCall {
                    id: Some("c1".into()),
                    name: Some("f".into()),
                    args: ToolArgs::Fragment("{\"a\"".into())
                },
                DeltaPart::ToolCall {
                    id: Some("c2".into()),
                    name: None,
                    args: ToolArgs::Full(json!({"a": 1}))
                },
            ]
        );
    }

    #[test]
    fn test_final_message() {
        let data = r#"{"final": true, "responseMessage": {"messageId": "m-2", "conversationId": "c-1", "promptTokens": 12, "tokenCount": 30, "stopReason": "STOP"}}"#;
        let Some(BackendEvent::Final(message)) = parse_backend_event(data) else {
            panic!("expected final");
        };
        assert_eq!(message.message_id.as_deref(), Some("m-2"));
        assert_eq!(message.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(message.prompt_tokens, Some(12));
        assert_eq!(message.token_count, Some(30));
        assert_eq!(message.stop_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_unparseable_payloads_are_none() {
        assert_eq!(parse_backend_event("not json"), None);
        assert_eq!(parse_backend_event("[DONE]"), None);
        assert_eq!(parse_backend_event(r#"{"event": "on_unknown"}"#), None);
        assert_eq!(parse_backend_event("[1,2]"), None);
    }

    #[test]
    fn test_bare_string_content() {
        assert_eq!(
            parse_delta_parts(&json!("hi")),
            vec![DeltaPart::Text("hi".into())]
        );
        assert!(parse_delta_parts(&json!(null)).is_empty());
    }
}
