pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use crate::config::ReasoningEffort;

/// Threaded text backend request wire type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub text: String,
    /// Serialized as `null` on a fresh conversation.
    pub parent_message_id: Option<String>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub is_continued: bool,
    #[serde(rename = "stop_sequences")]
    pub stop_sequences: Vec<String>,
    #[serde(rename = "max_tokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(
        rename = "reasoning_effort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(
        rename = "reasoning_summary",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// One decoded backend stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// `{created: true, message: {...}}`.
    Created { message_id: Option<String> },
    /// `{event: "on_run_step", ...}`; carries nothing the client sees.
    RunStep,
    /// `{event: "on_message_delta", data: {delta: {...}}}`.
    MessageDelta {
        content: Vec<DeltaPart>,
        thought_signature: Option<String>,
    },
    /// `{final: true, responseMessage: {...}}`.
    Final(FinalMessage),
}

/// A typed slice of a backend delta.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaPart {
    Text(String),
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolCall {
        id: Option<String>,
        name: Option<String>,
        args: ToolArgs,
    },
}

/// Native tool-call arguments as delivered by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    /// A partial JSON fragment, appended to what came before.
    Fragment(String),
    /// A complete object, replacing what came before.
    Full(serde_json::Value),
    None,
}

/// Completion payload (`responseMessage`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub token_count: Option<u64>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub thought_signature: Option<String>,
    /// Raw content parts, replayed when nothing was streamed.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}
