use crate::config::{ReasoningEffort, TranslationConfig};
use crate::fc::{build_tool_prompt, render_tool_call, SENTINEL_STOP};
use crate::protocol::backend::BackendRequest;
use crate::protocol::canonical::{ContentBlock, Message, RequestContext, Role};
use crate::state::{ConversationState, SignatureCache};
use crate::util::random_uuid;

const SYSTEM_LABEL: &str = "System";
const TURN_SEPARATOR: &str = "\n\n";

/// Encode a request into the threaded backend wire format.
///
/// `stored` is the session's saved [`ConversationState`]; threading fields
/// carried by the request itself take precedence over it. Never fails:
/// absent optional fields fall back to neutral values.
#[must_use]
pub fn encode_backend_request(
    ctx: &RequestContext,
    stored: Option<&ConversationState>,
    config: &TranslationConfig,
    signatures: &SignatureCache,
) -> BackendRequest {
    let state = match ctx.conversation.as_ref() {
        Some(hints) => hints.merged_with(stored),
        None => stored.cloned().unwrap_or_default(),
    };

    // --- text ---
    let flatten = state.last_assistant_message_id.is_none() && ctx.messages.len() > 1;
    let mut text = if flatten {
        flatten_conversation(ctx.system_prompt.as_deref(), &ctx.messages)
    } else {
        latest_turn_text(ctx, &state)
    };
    tracing::debug!(
        model = %ctx.model,
        flatten,
        turns = ctx.messages.len(),
        "encoding backend request"
    );

    // --- tools ---
    if let Some(block) = build_tool_prompt(
        &ctx.tools,
        &ctx.tool_choice,
        config.tool_description_max_chars,
    ) {
        if !text.is_empty() {
            text.push_str(TURN_SEPARATOR);
        }
        text.push_str(&block);
    }

    // --- reasoning ---
    let thinking = ctx
        .thinking
        .map_or_else(|| model_implies_reasoning(&ctx.model), |t| t.enabled);
    let (reasoning_effort, reasoning_summary) = if thinking {
        let effort = ctx
            .thinking
            .and_then(|t| t.budget_tokens)
            .map_or(config.reasoning_effort, effort_for_budget);
        let summary = Some(config.reasoning_summary.clone()).filter(|s| !s.is_empty());
        (Some(effort), summary)
    } else {
        (None, None)
    };

    let (parent_message_id, conversation_id) = if flatten {
        (None, None)
    } else {
        (state.last_assistant_message_id, state.conversation_id)
    };

    BackendRequest {
        text,
        parent_message_id,
        message_id: random_uuid().to_string(),
        conversation_id,
        model: ctx.model.clone(),
        endpoint: config.endpoint.clone(),
        is_continued: false,
        stop_sequences: effective_stop_sequences(&ctx.stop_sequences),
        max_tokens: ctx.max_tokens.as_ref().and_then(normalize_max_tokens),
        reasoning_effort,
        reasoning_summary,
        thought_signature: continuity_signature(&ctx.messages, signatures),
    }
}

/// Whole history as one labelled transcript: system prompt first, then every
/// turn, separated by blank lines.
fn flatten_conversation(system_prompt: Option<&str>, messages: &[Message]) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        sections.push(format!("{SYSTEM_LABEL}: {system}"));
    }
    for message in messages {
        let body = render_blocks(&message.content);
        if body.is_empty() {
            continue;
        }
        sections.push(format!("{}: {}", message.role.label(), body));
    }
    sections.join(TURN_SEPARATOR)
}

/// Only the newest turn; a changed system prompt rides along in front.
fn latest_turn_text(ctx: &RequestContext, state: &ConversationState) -> String {
    let body = ctx
        .messages
        .last()
        .map(|message| render_blocks(&message.content))
        .unwrap_or_default();

    match ctx.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(system) if state.system_prompt.as_deref() != Some(system) => {
            if body.is_empty() {
                format!("{SYSTEM_LABEL}: {system}")
            } else {
                format!("{SYSTEM_LABEL}: {system}{TURN_SEPARATOR}{body}")
            }
        }
        _ => body,
    }
}

fn render_blocks(blocks: &[ContentBlock]) -> String {
    let mut rendered: Vec<String> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    rendered.push(text.clone());
                }
            }
            ContentBlock::ToolUse { id, name, input } => {
                rendered.push(render_tool_call(id, name, input));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => rendered.push(render_tool_result(tool_use_id, content, *is_error)),
            ContentBlock::Image { source } => rendered.push(image_placeholder(source)),
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
        }
    }
    rendered.join("\n")
}

fn render_tool_result(tool_use_id: &str, content: &serde_json::Value, is_error: bool) -> String {
    let body = flatten_tool_result_content(content);
    let error_attr = if is_error { " is_error=\"true\"" } else { "" };
    format!("<tool_result tool_use_id=\"{tool_use_id}\"{error_attr}>\n{body}\n</tool_result>")
}

fn flatten_tool_result_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .map(|part| match part.get("type").and_then(|t| t.as_str()) {
                Some("text") => part
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                Some("image") => {
                    image_placeholder(part.get("source").unwrap_or(&serde_json::Value::Null))
                }
                _ => match part {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn image_placeholder(source: &serde_json::Value) -> String {
    let media_type = source
        .get("media_type")
        .and_then(|m| m.as_str())
        .unwrap_or("image");
    format!("[Image: {media_type}]")
}

/// Caller sequences (de-duplicated, order kept) followed by the sentinel.
fn effective_stop_sequences(caller: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(caller.len() + 1);
    for seq in caller {
        if seq.is_empty() || seq == SENTINEL_STOP || out.contains(seq) {
            continue;
        }
        out.push(seq.clone());
    }
    out.push(SENTINEL_STOP.to_string());
    out
}

/// Positive integer, integral float, or numeric string; anything else is
/// dropped.
fn normalize_max_tokens(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().and_then(from_f64))
            .filter(|v| *v > 0),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_f64))
                .filter(|v| *v > 0)
        }
        _ => None,
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn from_f64(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 1.0 && f.fract() == 0.0 && f < u64::MAX as f64).then_some(f as u64)
}

/// Reasoning-capable model ids, by naming convention.
fn model_implies_reasoning(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    if ["thinking", "reasoning", "reasoner", "-r1"]
        .iter()
        .any(|marker| model.contains(marker))
    {
        return true;
    }
    let base = model.rsplit('/').next().unwrap_or(&model);
    ["o1", "o3", "o4"].iter().any(|prefix| base.starts_with(prefix))
}

fn effort_for_budget(budget_tokens: u64) -> ReasoningEffort {
    match budget_tokens {
        0..=4095 => ReasoningEffort::Low,
        4096..=16383 => ReasoningEffort::Medium,
        _ => ReasoningEffort::High,
    }
}

/// Signature from the newest assistant turn, if the cache still vouches
/// for it.
fn continuity_signature(messages: &[Message], signatures: &SignatureCache) -> Option<String> {
    let last_assistant = messages.iter().rev().find(|m| m.role == Role::Assistant)?;
    for block in last_assistant.content.iter().rev() {
        if let ContentBlock::Thinking {
            signature: Some(signature),
            ..
        } = block
        {
            if signatures.is_fresh(signature) {
                return Some(signature.clone());
            }
        }
    }
    last_assistant.content.iter().rev().find_map(|block| match block {
        ContentBlock::ToolUse { id, .. } => signatures.tool_signature(id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignaturesConfig;
    use crate::protocol::canonical::{ThinkingConfig, ToolChoice, ToolSpec};
    use serde_json::json;

    fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    fn assistant(blocks: Vec<ContentBlock>) -> Message {
        Message {
            role: Role::Assistant,
            content: blocks,
        }
    }

    fn encode(ctx: &RequestContext, stored: Option<&ConversationState>) -> BackendRequest {
        let signatures = SignatureCache::new(&SignaturesConfig::default());
        encode_backend_request(ctx, stored, &TranslationConfig::default(), &signatures)
    }

    #[test]
    fn test_new_conversation_flattens_history() {
        let mut ctx = RequestContext::new(
            "gpt-4o",
            vec![
                user("Hi"),
                assistant(vec![ContentBlock::text("Hello!")]),
                user("Weather?"),
            ],
        );
        ctx.system_prompt = Some("Be brief.".into());
        let req = encode(&ctx, None);
        assert_eq!(
            req.text,
            "System: Be brief.\n\nUser: Hi\n\nAssistant: Hello!\n\nUser: Weather?"
        );
        assert_eq!(req.parent_message_id, None);
        assert_eq!(req.endpoint, "agents");
        assert!(!req.is_continued);
    }

    #[test]
    fn test_threaded_request_sends_latest_turn_only() {
        let mut ctx = RequestContext::new(
            "gpt-4o",
            vec![user("Hi"), assistant(vec![ContentBlock::text("Hello!")]), user("More")],
        );
        ctx.system_prompt = Some("Be brief.".into());
        let stored = ConversationState {
            conversation_id: Some("conv-1".into()),
            last_assistant_message_id: Some("msg-7".into()),
            system_prompt: Some("Be brief.".into()),
        };
        let req = encode(&ctx, Some(&stored));
        assert_eq!(req.text, "More");
        assert_eq!(req.parent_message_id.as_deref(), Some("msg-7"));
        assert_eq!(req.conversation_id.as_deref(), Some("conv-1"));
    }

    #[test]
    fn test_changed_system_prompt_is_prepended_when_threading() {
        let mut ctx = RequestContext::new("m", vec![user("Next")]);
        ctx.system_prompt = Some("New rules.".into());
        let stored = ConversationState {
            last_assistant_message_id: Some("msg-1".into()),
            system_prompt: Some("Old rules.".into()),
            ..ConversationState::default()
        };
        assert_eq!(encode(&ctx, Some(&stored)).text, "System: New rules.\n\nNext");
    }

    #[test]
    fn test_request_hints_override_stored_parent() {
        let mut ctx = RequestContext::new("m", vec![user("a"), user("b")]);
        ctx.conversation = Some(ConversationState {
            last_assistant_message_id: Some("from-request".into()),
            ..ConversationState::default()
        });
        let stored = ConversationState {
            last_assistant_message_id: Some("from-store".into()),
            conversation_id: Some("conv".into()),
            ..ConversationState::default()
        };
        let req = encode(&ctx, Some(&stored));
        assert_eq!(req.parent_message_id.as_deref(), Some("from-request"));
        assert_eq!(req.conversation_id.as_deref(), Some("conv"));
        assert_eq!(req.text, "b");
    }

    #[test]
    fn test_block_rendering() {
        let ctx = RequestContext::new(
            "m",
            vec![
                user("Check Oslo"),
                assistant(vec![
                    ContentBlock::Thinking {
                        thinking: "secret plan".into(),
                        signature: None,
                    },
                    ContentBlock::RedactedThinking { data: "xyz".into() },
                    ContentBlock::ToolUse {
                        id: "toolu_1".into(),
                        name: "get_weather".into(),
                        input: json!({"city": "Oslo"}),
                    },
                ]),
                Message {
                    role: Role::User,
                    content: vec![
                        ContentBlock::ToolResult {
                            tool_use_id: "toolu_1".into(),
                            content: json!([{"type": "text", "text": "12C"}]),
                            is_error: true,
                        },
                        ContentBlock::Image {
                            source: json!({"type": "base64", "media_type": "image/png", "data": "AA"}),
                        },
                    ],
                },
            ],
        );
        let text = encode(&ctx, None).text;
        assert!(!text.contains("secret plan"));
        assert!(!text.contains("xyz"));
        assert!(text.contains(
            "Assistant: <tool_call id=\"toolu_1\">{\"name\": \"get_weather\", \"parameters\": {\"city\":\"Oslo\"}}</tool_call>"
        ));
        assert!(text.contains(
            "User: <tool_result tool_use_id=\"toolu_1\" is_error=\"true\">\n12C\n</tool_result>\n[Image: image/png]"
        ));
    }

    #[test]
    fn test_sentinel_appended_exactly_once() {
        let mut ctx = RequestContext::new("m", vec![user("x")]);
        assert_eq!(encode(&ctx, None).stop_sequences, vec![SENTINEL_STOP]);

        ctx.stop_sequences = vec![
            "END".into(),
            SENTINEL_STOP.into(),
            "END".into(),
            String::new(),
        ];
        assert_eq!(encode(&ctx, None).stop_sequences, vec!["END", SENTINEL_STOP]);
    }

    #[test]
    fn test_max_tokens_normalization() {
        assert_eq!(normalize_max_tokens(&json!(1024)), Some(1024));
        assert_eq!(normalize_max_tokens(&json!(512.0)), Some(512));
        assert_eq!(normalize_max_tokens(&json!(" 300 ")), Some(300));
        assert_eq!(normalize_max_tokens(&json!("64.0")), Some(64));
        assert_eq!(normalize_max_tokens(&json!(12.5)), None);
        assert_eq!(normalize_max_tokens(&json!(0)), None);
        assert_eq!(normalize_max_tokens(&json!(-5)), None);
        assert_eq!(normalize_max_tokens(&json!("lots")), None);
        assert_eq!(normalize_max_tokens(&json!(null)), None);
    }

    #[test]
    fn test_reasoning_hints_follow_thinking_flag() {
        let mut ctx = RequestContext::new("gpt-4o", vec![user("x")]);
        let req = encode(&ctx, None);
        assert_eq!(req.reasoning_effort, None);
        assert_eq!(req.reasoning_summary, None);

        ctx.thinking = Some(ThinkingConfig {
            enabled: true,
            budget_tokens: Some(2000),
        });
        let req = encode(&ctx, None);
        assert_eq!(req.reasoning_effort, Some(ReasoningEffort::Low));
        assert_eq!(req.reasoning_summary.as_deref(), Some("auto"));

        ctx.thinking = Some(ThinkingConfig {
            enabled: false,
            budget_tokens: None,
        });
        ctx.model = "deepseek-reasoner".into();
        assert_eq!(encode(&ctx, None).reasoning_effort, None);

        ctx.thinking = None;
        assert_eq!(encode(&ctx, None).reasoning_effort, Some(ReasoningEffort::Medium));
    }

    #[test]
    fn test_model_inference_and_effort_thresholds() {
        for model in ["o3-mini", "openai/o1", "claude-thinking", "deepseek-r1", "qwq-reasoning"] {
            assert!(model_implies_reasoning(model), "{model}");
        }
        for model in ["gpt-4o", "claude-sonnet", "solo1"] {
            assert!(!model_implies_reasoning(model), "{model}");
        }
        assert_eq!(effort_for_budget(4095), ReasoningEffort::Low);
        assert_eq!(effort_for_budget(4096), ReasoningEffort::Medium);
        assert_eq!(effort_for_budget(16383), ReasoningEffort::Medium);
        assert_eq!(effort_for_budget(16384), ReasoningEffort::High);
    }

    #[test]
    fn test_tool_block_appended_after_prompt() {
        let mut ctx = RequestContext::new("m", vec![user("Weather in Oslo?")]);
        ctx.tools = vec![ToolSpec {
            name: "get_weather".into(),
            description: Some("Weather lookup".into()),
            input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }];
        ctx.tool_choice = ToolChoice::Any;
        let text = encode(&ctx, None).text;
        assert!(text.starts_with("Weather in Oslo?\n\n# Available tools"));
        assert!(text.ends_with(crate::fc::prompt::SYNTAX_INSTRUCTIONS));
        assert_eq!(text.matches("## Tool: ").count(), 1);
    }

    #[test]
    fn test_fresh_signature_is_forwarded() {
        let signatures = SignatureCache::new(&SignaturesConfig::default());
        let known = "k".repeat(64);
        let unknown = "u".repeat(64);
        signatures.store_signature_family(&known, "claude");

        let ctx = RequestContext::new(
            "m",
            vec![
                user("a"),
                assistant(vec![ContentBlock::Thinking {
                    thinking: "t".into(),
                    signature: Some(known.clone()),
                }]),
                user("b"),
            ],
        );
        let req = encode_backend_request(&ctx, None, &TranslationConfig::default(), &signatures);
        assert_eq!(req.thought_signature.as_deref(), Some(known.as_str()));

        let ctx = RequestContext::new(
            "m",
            vec![assistant(vec![ContentBlock::Thinking {
                thinking: "t".into(),
                signature: Some(unknown),
            }])],
        );
        let req = encode_backend_request(&ctx, None, &TranslationConfig::default(), &signatures);
        assert_eq!(req.thought_signature, None);
    }

    #[test]
    fn test_tool_use_signature_lookup() {
        let signatures = SignatureCache::new(&SignaturesConfig::default());
        let sig = "s".repeat(80);
        signatures.store_tool_signature("toolu_9", &sig);
        let ctx = RequestContext::new(
            "m",
            vec![assistant(vec![ContentBlock::ToolUse {
                id: "toolu_9".into(),
                name: "f".into(),
                input: json!({}),
            }])],
        );
        let req = encode_backend_request(&ctx, None, &TranslationConfig::default(), &signatures);
        assert_eq!(req.thought_signature.as_deref(), Some(sig.as_str()));
    }

    #[test]
    fn test_wire_shape() {
        let ctx = RequestContext::new("m", vec![user("x")]);
        let value = serde_json::to_value(encode(&ctx, None)).unwrap();
        assert_eq!(value["parentMessageId"], json!(null));
        assert_eq!(value["stop_sequences"], json!([SENTINEL_STOP]));
        assert_eq!(value["isContinued"], json!(false));
        assert!(value.get("max_tokens").is_none());
        assert!(value.get("thoughtSignature").is_none());
        assert!(value.get("conversationId").is_none());
        assert_eq!(value["messageId"].as_str().map(str::len), Some(36));
    }
}
