mod conversation;
mod signature_cache;

use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::backend::encoder::encode_backend_request;
use crate::protocol::backend::BackendRequest;
use crate::protocol::messages::decoder::{decode_messages_request, session_hints};
use crate::protocol::messages::MessagesRequest;
use crate::stream::{StreamTransformer, TransformOptions};

pub use conversation::{ConversationState, ConversationStore, SessionHints};
pub use signature_cache::SignatureCache;

/// Shared state for every request handled by the bridge.
///
/// Owns the two process-wide stores; everything else is per turn.
pub struct BridgeState {
    pub config: AppConfig,
    conversations: ConversationStore,
    signatures: Arc<SignatureCache>,
}

/// Bookkeeping carried from [`BridgeState::prepare_turn`] to
/// [`BridgeState::complete_turn`].
#[derive(Debug, Clone)]
pub struct TurnSession {
    pub session_id: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub started: Instant,
}

/// Everything needed to run one turn against the backend.
pub struct PreparedTurn {
    pub session: TurnSession,
    pub request: BackendRequest,
    pub transformer: StreamTransformer,
}

impl BridgeState {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let conversations = ConversationStore::new(config.sessions.ttl());
        let signatures = Arc::new(SignatureCache::new(&config.signatures));
        tracing::info!(
            session_ttl_secs = config.sessions.ttl_secs,
            signature_ttl_secs = config.signatures.ttl_secs,
            endpoint = %config.translation.endpoint,
            "bridge state initialized"
        );
        Self {
            config,
            conversations,
            signatures,
        }
    }

    #[must_use]
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    #[must_use]
    pub fn signatures(&self) -> &Arc<SignatureCache> {
        &self.signatures
    }

    /// Decode a client request, resolve its session and build the backend
    /// request plus the transformer for its response.
    ///
    /// `session_header` is the explicit session id the HTTP layer found, if
    /// any.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidRequest`] when the request has no model
    /// or no messages.
    pub fn prepare_turn(
        &self,
        request: MessagesRequest,
        session_header: Option<&str>,
    ) -> Result<PreparedTurn, BridgeError> {
        let hints = session_hints(request.metadata.as_ref(), session_header);
        let mut ctx = decode_messages_request(request)?;
        ctx.passthrough |= self.config.features.passthrough;

        let session_id = self.conversations.resolve(&hints);
        let stored = self.conversations.get(&session_id);
        let backend_request = encode_backend_request(
            &ctx,
            stored.as_ref(),
            &self.config.translation,
            &self.signatures,
        );

        let options = TransformOptions {
            model: ctx.model.clone(),
            passthrough: ctx.passthrough,
            stop_sequences: backend_request.stop_sequences.clone(),
            max_tokens: backend_request.max_tokens,
            max_pending_bytes: self.config.translation.max_pending_buffer_bytes,
            estimated_input_tokens: estimate_request_tokens(&ctx),
        };
        let transformer = StreamTransformer::new(options, Arc::clone(&self.signatures));

        tracing::info!(
            session = %session_id,
            model = %ctx.model,
            threaded = backend_request.parent_message_id.is_some(),
            passthrough = ctx.passthrough,
            "prepared turn"
        );

        Ok(PreparedTurn {
            session: TurnSession {
                session_id,
                model: ctx.model,
                system_prompt: ctx.system_prompt,
                started: Instant::now(),
            },
            request: backend_request,
            transformer,
        })
    }

    /// Record what the backend reported so the next turn can thread onto it.
    ///
    /// The store is left alone when the backend never identified its reply.
    pub fn complete_turn(&self, session: &TurnSession, transformer: &StreamTransformer) {
        let usage = transformer.usage();
        log_request_complete(&session.model, &usage, session.started);

        let mut update = transformer.conversation_update();
        if update.last_assistant_message_id.is_none() {
            tracing::debug!(
                session = %session.session_id,
                "no backend message id; conversation state unchanged"
            );
            return;
        }
        update.system_prompt.clone_from(&session.system_prompt);
        self.conversations.update(&session.session_id, &update);
    }

    /// Forget a session's threading state.
    pub fn reset_session(&self, session_id: &str) -> bool {
        let existed = self.conversations.reset(session_id);
        tracing::info!(session = %session_id, existed, "session reset");
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    fn finish(turn: &mut PreparedTurn, frame: &str) {
        let mut out = Vec::new();
        turn.transformer.handle_frame(frame, &mut out);
        assert!(turn.transformer.has_ended());
    }

    #[test]
    fn test_second_turn_threads_onto_first() {
        let state = BridgeState::new(AppConfig::default());
        let mut first = state
            .prepare_turn(
                request(json!({
                    "model": "m",
                    "system": "Be brief.",
                    "messages": [{"role": "user", "content": "hi"}],
                    "metadata": {"session_id": "s1"}
                })),
                None,
            )
            .unwrap();
        assert_eq!(first.session.session_id, "s1");
        assert_eq!(first.request.parent_message_id, None);
        finish(
            &mut first,
            r#"{"final":true,"responseMessage":{"messageId":"r1","conversationId":"c1"}}"#,
        );
        state.complete_turn(&first.session, &first.transformer);

        let stored = state.conversations().get("s1").unwrap();
        assert_eq!(stored.conversation_id.as_deref(), Some("c1"));
        assert_eq!(stored.last_assistant_message_id.as_deref(), Some("r1"));
        assert_eq!(stored.system_prompt.as_deref(), Some("Be brief."));

        let second = state
            .prepare_turn(
                request(json!({
                    "model": "m",
                    "system": "Be brief.",
                    "messages": [
                        {"role": "user", "content": "hi"},
                        {"role": "assistant", "content": "hello"},
                        {"role": "user", "content": "again"}
                    ]
                })),
                Some("s1"),
            )
            .unwrap();
        assert_eq!(second.request.parent_message_id.as_deref(), Some("r1"));
        assert_eq!(second.request.conversation_id.as_deref(), Some("c1"));
        assert!(second.request.text.contains("again"));
        assert!(!second.request.text.contains("hello"));
        assert!(!second.request.text.contains("Be brief."));
    }

    #[test]
    fn test_truncated_turn_leaves_store_untouched() {
        let state = BridgeState::new(AppConfig::default());
        let mut turn = state
            .prepare_turn(
                request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": "hi"}]
                })),
                Some("s2"),
            )
            .unwrap();
        let mut out = Vec::new();
        turn.transformer.force_terminate(&mut out);
        state.complete_turn(&turn.session, &turn.transformer);
        assert_eq!(state.conversations().get("s2"), None);
    }

    #[test]
    fn test_invalid_request_is_rejected() {
        let state = BridgeState::new(AppConfig::default());
        let err = state
            .prepare_turn(request(json!({"model": "m", "messages": []})), None)
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::InvalidRequest(_)));
    }

    #[test]
    fn test_config_passthrough_applies_to_every_turn() {
        let mut config = AppConfig::default();
        config.features.passthrough = true;
        let state = BridgeState::new(config);
        let mut turn = state
            .prepare_turn(
                request(json!({
                    "model": "m",
                    "messages": [{"role": "user", "content": "hi"}]
                })),
                None,
            )
            .unwrap();
        let raw = "<tool_call>{\"name\": \"ls\", \"parameters\": {}}</tool_call>";
        let frame = json!({
            "event": "on_message_delta",
            "data": {"delta": {"content": [{"type": "text", "text": raw}]}}
        })
        .to_string();
        let mut out = Vec::new();
        turn.transformer.handle_frame(&frame, &mut out);
        let response = turn.transformer.into_response();
        assert_eq!(
            response.content,
            vec![crate::protocol::canonical::ContentBlock::text(raw)]
        );
    }

    #[test]
    fn test_reset_session() {
        let state = BridgeState::new(AppConfig::default());
        state.conversations().update(
            "s3",
            &ConversationState {
                conversation_id: Some("c".into()),
                ..ConversationState::default()
            },
        );
        assert!(state.reset_session("s3"));
        assert!(!state.reset_session("s3"));
    }
}
