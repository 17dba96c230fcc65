use serde_json::json;
use threadbridge::config::{SignaturesConfig, TranslationConfig};
use threadbridge::fc::prompt::SYNTAX_INSTRUCTIONS;
use threadbridge::protocol::backend::encoder::encode_backend_request;
use threadbridge::protocol::backend::BackendRequest;
use threadbridge::protocol::messages::decoder::decode_messages_request;
use threadbridge::protocol::messages::MessagesRequest;
use threadbridge::state::{ConversationState, SignatureCache};

fn translate_with(
    body: serde_json::Value,
    stored: Option<&ConversationState>,
    signatures: &SignatureCache,
) -> BackendRequest {
    let request: MessagesRequest = serde_json::from_value(body).expect("request json");
    let ctx = decode_messages_request(request).expect("decode");
    encode_backend_request(&ctx, stored, &TranslationConfig::default(), signatures)
}

fn translate(body: serde_json::Value) -> BackendRequest {
    translate_with(
        body,
        None,
        &SignatureCache::new(&SignaturesConfig::default()),
    )
}

#[test]
fn test_fresh_history_is_flattened_into_one_transcript() {
    let request = translate(json!({
        "model": "gpt-4o",
        "system": "You are terse.",
        "messages": [
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": [{"type": "text", "text": "hello"}]},
            {"role": "user", "content": "again"}
        ]
    }));
    assert_eq!(
        request.text,
        "System: You are terse.\n\nUser: hi\n\nAssistant: hello\n\nUser: again"
    );
    assert_eq!(request.parent_message_id, None);
    assert_eq!(request.conversation_id, None);
    assert_eq!(request.stop_sequences, vec!["</tool_call>".to_string()]);

    let wire = serde_json::to_value(&request).expect("serialize");
    assert_eq!(wire["parentMessageId"], serde_json::Value::Null);
    assert!(wire.get("conversationId").is_none());
    assert_eq!(wire["endpoint"], "agents");
    assert_eq!(wire["isContinued"], false);
}

#[test]
fn test_threaded_turn_sends_only_latest_message() {
    let stored = ConversationState {
        conversation_id: Some("conv-1".into()),
        last_assistant_message_id: Some("msg-9".into()),
        system_prompt: Some("You are terse.".into()),
    };
    let request = translate_with(
        json!({
            "model": "m",
            "system": "You are terse.",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "again"}
            ]
        }),
        Some(&stored),
        &SignatureCache::new(&SignaturesConfig::default()),
    );
    assert_eq!(request.text, "again");
    assert_eq!(request.parent_message_id.as_deref(), Some("msg-9"));
    assert_eq!(request.conversation_id.as_deref(), Some("conv-1"));
}

#[test]
fn test_changed_system_prompt_is_resent() {
    let stored = ConversationState {
        last_assistant_message_id: Some("msg-1".into()),
        system_prompt: Some("old".into()),
        ..ConversationState::default()
    };
    let request = translate_with(
        json!({
            "model": "m",
            "system": [{"type": "text", "text": "new"}],
            "messages": [{"role": "user", "content": "q"}]
        }),
        Some(&stored),
        &SignatureCache::new(&SignaturesConfig::default()),
    );
    assert_eq!(request.text, "System: new\n\nq");
}

#[test]
fn test_metadata_threading_hints_override_stored_state() {
    let stored = ConversationState {
        conversation_id: Some("stored-conv".into()),
        last_assistant_message_id: Some("stored-msg".into()),
        system_prompt: None,
    };
    let request = translate_with(
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": "q"}],
            "metadata": {"parent_message_id": "client-msg"}
        }),
        Some(&stored),
        &SignatureCache::new(&SignaturesConfig::default()),
    );
    assert_eq!(request.parent_message_id.as_deref(), Some("client-msg"));
    assert_eq!(request.conversation_id.as_deref(), Some("stored-conv"));
}

#[test]
fn test_tool_history_renders_as_markup() {
    let request = translate(json!({
        "model": "m",
        "messages": [
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "4C"}]},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": "boom", "is_error": true}
            ]}
        ]
    }));
    assert!(request.text.contains("Assistant: Checking.\n<tool_call id=\"toolu_1\""));
    assert!(request.text.contains("get_weather"));
    assert!(request
        .text
        .contains("<tool_result tool_use_id=\"toolu_1\">\n4C\n</tool_result>"));
    assert!(request
        .text
        .contains("<tool_result tool_use_id=\"toolu_2\" is_error=\"true\">\nboom\n</tool_result>"));
}

#[test]
fn test_image_blocks_become_placeholders() {
    let request = translate(json!({
        "model": "m",
        "messages": [{"role": "user", "content": [
            {"type": "text", "text": "what is this"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
        ]}]
    }));
    assert_eq!(request.text, "what is this\n[Image: image/png]");
}

#[test]
fn test_declared_tools_append_instructions_block() {
    let request = translate(json!({
        "model": "m",
        "messages": [{"role": "user", "content": "list files"}],
        "tools": [{
            "name": "ls",
            "description": "List a directory",
            "input_schema": {"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}
        }],
        "tool_choice": {"type": "tool", "name": "ls"},
        "stop_sequences": ["\n\nHuman:", "</tool_call>", "\n\nHuman:"]
    }));
    assert!(request.text.starts_with("list files\n\n"));
    assert!(request.text.contains("## Tool: ls"));
    assert!(request.text.ends_with(SYNTAX_INSTRUCTIONS));
    assert_eq!(
        request.stop_sequences,
        vec!["\n\nHuman:".to_string(), "</tool_call>".to_string()]
    );
}

#[test]
fn test_max_tokens_normalization() {
    let cases = [
        (json!(1024), Some(1024)),
        (json!("2048"), Some(2048)),
        (json!(512.0), Some(512)),
        (json!(0), None),
        (json!(-5), None),
        (json!(12.5), None),
        (json!("lots"), None),
    ];
    for (raw, expected) in cases {
        let request = translate(json!({
            "model": "m",
            "max_tokens": raw.clone(),
            "messages": [{"role": "user", "content": "x"}]
        }));
        assert_eq!(request.max_tokens, expected, "max_tokens {raw}");
    }
}

#[test]
fn test_reasoning_hints() {
    let request = translate(json!({
        "model": "m",
        "thinking": {"type": "enabled", "budget_tokens": 20000},
        "messages": [{"role": "user", "content": "x"}]
    }));
    let wire = serde_json::to_value(&request).expect("serialize");
    assert_eq!(wire["reasoning_effort"], "high");
    assert_eq!(wire["reasoning_summary"], "auto");

    let request = translate(json!({
        "model": "deepseek-r1",
        "messages": [{"role": "user", "content": "x"}]
    }));
    assert!(request.reasoning_effort.is_some());

    let request = translate(json!({
        "model": "m",
        "messages": [{"role": "user", "content": "x"}]
    }));
    let wire = serde_json::to_value(&request).expect("serialize");
    assert!(wire.get("reasoning_effort").is_none());
}

#[test]
fn test_cached_signature_is_forwarded() {
    let signatures = SignatureCache::new(&SignaturesConfig::default());
    let signature = "x".repeat(64);
    signatures.store_signature_family(&signature, "m");
    let request = translate_with(
        json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": signature.clone()},
                    {"type": "text", "text": "a"}
                ]},
                {"role": "user", "content": "q2"}
            ]
        }),
        None,
        &signatures,
    );
    assert_eq!(request.thought_signature.as_deref(), Some(signature.as_str()));

    let unknown = translate(json!({
        "model": "m",
        "messages": [
            {"role": "assistant", "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "y".repeat(64)}
            ]},
            {"role": "user", "content": "q2"}
        ]
    }));
    assert_eq!(unknown.thought_signature, None);
}

#[test]
fn test_invalid_requests_are_rejected() {
    for body in [
        json!({"model": "", "messages": [{"role": "user", "content": "x"}]}),
        json!({"model": "m", "messages": []}),
    ] {
        let request: MessagesRequest = serde_json::from_value(body).expect("request json");
        assert!(decode_messages_request(request).is_err());
    }
}
