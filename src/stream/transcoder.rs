use std::sync::Arc;

use crate::fc::{parse_json_lenient, MarkupScanner, ParsedToolCall, ScanEvent};
use crate::observability::token_counter::{estimate_tokens_for_bytes, merge_usage};
use crate::protocol::backend::stream::{parse_backend_event, parse_delta_parts};
use crate::protocol::backend::{BackendEvent, DeltaPart, FinalMessage, ToolArgs};
use crate::protocol::canonical::{ContentBlock, StopReason, Usage};
use crate::protocol::mapping::backend_stop_to_canonical;
use crate::protocol::messages::{
    BlockDelta, DeltaUsage, MessageDeltaBody, MessagesResponse, StreamEvent,
};
use crate::state::{ConversationState, SignatureCache};
use crate::util::{next_message_id, next_tool_use_id};

/// Per-turn settings for a [`StreamTransformer`].
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub model: String,
    /// Leave embedded markup in the text untouched.
    pub passthrough: bool,
    /// Effective stop list sent to the backend, sentinel included.
    pub stop_sequences: Vec<String>,
    pub max_tokens: Option<u64>,
    pub max_pending_bytes: usize,
    /// Used when the backend reports no prompt token count.
    pub estimated_input_tokens: u64,
}

impl TransformOptions {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            passthrough: false,
            stop_sequences: Vec::new(),
            max_tokens: None,
            max_pending_bytes: 512 * 1024,
            estimated_input_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Started,
    Ended,
}

#[derive(Debug, Clone)]
enum OpenBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

impl OpenBlock {
    fn seed(&self) -> ContentBlock {
        match self {
            OpenBlock::Text { .. } => ContentBlock::text(""),
            OpenBlock::Thinking { .. } => ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            OpenBlock::ToolUse { id, name, .. } => ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        }
    }

    fn snapshot(&self) -> ContentBlock {
        match self {
            OpenBlock::Text { text } => ContentBlock::text(text.clone()),
            OpenBlock::Thinking {
                thinking,
                signature,
            } => ContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
            OpenBlock::ToolUse {
                id,
                name,
                input_json,
            } => ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: tool_input_value(input_json),
            },
        }
    }
}

/// Accumulated tool input as a JSON object; empty or unrecoverable input
/// becomes `{}`.
fn tool_input_value(input_json: &str) -> serde_json::Value {
    if input_json.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    match parse_json_lenient(input_json).into_value() {
        Some(value @ serde_json::Value::Object(_)) => value,
        Some(other) => {
            tracing::debug!("tool input is not an object: {}", other);
            serde_json::Value::Object(serde_json::Map::new())
        }
        None => {
            tracing::debug!(
                len = input_json.len(),
                "tool input JSON unrecoverable, using empty object"
            );
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

/// Rebuilds typed content blocks from backend deltas for one turn.
///
/// Owned by a single request. Every backend event is translated into zero or
/// more client [`StreamEvent`]s; the same state also yields the aggregated
/// [`MessagesResponse`] via [`StreamTransformer::to_response`].
pub struct StreamTransformer {
    options: TransformOptions,
    signatures: Arc<SignatureCache>,
    message_id: String,
    phase: Phase,
    next_index: usize,
    open: Option<(usize, OpenBlock)>,
    blocks: Vec<ContentBlock>,
    scanner: MarkupScanner,
    scan_buffer: Vec<ScanEvent>,
    signature: Option<String>,
    saw_content: bool,
    output_bytes: usize,
    backend_message_id: Option<String>,
    conversation_id: Option<String>,
    backend_stop_reason: Option<String>,
    backend_stop_sequence: Option<String>,
    reported_input_tokens: Option<u64>,
    reported_output_tokens: Option<u64>,
    resolved_stop: Option<(StopReason, Option<String>)>,
}

impl StreamTransformer {
    #[must_use]
    pub fn new(options: TransformOptions, signatures: Arc<SignatureCache>) -> Self {
        let scanner = MarkupScanner::new(options.max_pending_bytes);
        Self {
            options,
            signatures,
            message_id: next_message_id(),
            phase: Phase::NotStarted,
            next_index: 0,
            open: None,
            blocks: Vec::new(),
            scanner,
            scan_buffer: Vec::with_capacity(4),
            signature: None,
            saw_content: false,
            output_bytes: 0,
            backend_message_id: None,
            conversation_id: None,
            backend_stop_reason: None,
            backend_stop_sequence: None,
            reported_input_tokens: None,
            reported_output_tokens: None,
            resolved_stop: None,
        }
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.options.model
    }

    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Threading pointers learned from the backend's completion signal.
    #[must_use]
    pub fn conversation_update(&self) -> ConversationState {
        ConversationState {
            conversation_id: self.conversation_id.clone(),
            last_assistant_message_id: self.backend_message_id.clone(),
            system_prompt: None,
        }
    }

    /// Decode one backend SSE `data` payload and translate it.
    ///
    /// Unparseable payloads are skipped.
    pub fn handle_frame(&mut self, data: &str, out: &mut Vec<StreamEvent>) {
        match parse_backend_event(data) {
            Some(event) => self.handle_event(event, out),
            None => tracing::debug!(
                len = data.len(),
                "skipping unparseable backend payload"
            ),
        }
    }

    /// Translate one backend event.
    pub fn handle_event(&mut self, event: BackendEvent, out: &mut Vec<StreamEvent>) {
        if self.phase == Phase::Ended {
            return;
        }
        match event {
            BackendEvent::Created { .. } => self.ensure_started(out),
            BackendEvent::RunStep => {}
            BackendEvent::MessageDelta {
                content,
                thought_signature,
            } => {
                self.ensure_started(out);
                if let Some(signature) = thought_signature {
                    self.capture_signature(&signature);
                }
                for part in content {
                    self.apply_part(part, out);
                }
            }
            BackendEvent::Final(message) => self.complete(message, out),
        }
    }

    fn complete(&mut self, message: FinalMessage, out: &mut Vec<StreamEvent>) {
        self.ensure_started(out);
        if !self.saw_content {
            if let Some(content) = message.content.as_ref() {
                let parts = parse_delta_parts(content);
                if !parts.is_empty() {
                    tracing::debug!(parts = parts.len(), "replaying final content");
                }
                for part in parts {
                    self.apply_part(part, out);
                }
            }
        }
        if let Some(signature) = message.thought_signature.as_deref() {
            self.capture_signature(signature);
        }
        self.backend_message_id = message.message_id;
        self.conversation_id = message.conversation_id;
        self.backend_stop_reason = message.stop_reason;
        self.backend_stop_sequence = message.stop_sequence;
        self.reported_input_tokens = message.prompt_tokens;
        self.reported_output_tokens = message.token_count;
        self.terminate(out);
    }

    /// End the turn without a completion signal.
    ///
    /// Flushes held text, closes the open block and emits the terminal
    /// events. Only the first call does anything.
    pub fn force_terminate(&mut self, out: &mut Vec<StreamEvent>) {
        if self.phase == Phase::Ended {
            return;
        }
        tracing::debug!(message_id = %self.message_id, "forcing stream termination");
        self.terminate(out);
    }

    fn terminate(&mut self, out: &mut Vec<StreamEvent>) {
        self.ensure_started(out);
        self.flush_scanner(out);
        self.close_open(out);

        let (reason, sequence) = self.resolve_stop_reason();
        self.resolved_stop = Some((reason, sequence.clone()));
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(reason.as_str().to_string()),
                stop_sequence: sequence,
            },
            usage: DeltaUsage {
                output_tokens: self.usage().output_tokens,
            },
        });
        out.push(StreamEvent::MessageStop {});
        self.phase = Phase::Ended;
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if self.phase != Phase::NotStarted {
            return;
        }
        self.phase = Phase::Started;
        let usage = Usage {
            input_tokens: self.options.estimated_input_tokens,
            output_tokens: 0,
        };
        out.push(StreamEvent::MessageStart {
            message: MessagesResponse::envelope(&self.message_id, &self.options.model, usage),
        });
    }

    fn apply_part(&mut self, part: DeltaPart, out: &mut Vec<StreamEvent>) {
        match part {
            DeltaPart::Text(text) => {
                if text.is_empty() {
                    return;
                }
                self.saw_content = true;
                if self.options.passthrough {
                    self.append_text(&text, out);
                } else {
                    let mut events = std::mem::take(&mut self.scan_buffer);
                    self.scanner.push(&text, &mut events);
                    self.apply_scan_events(&mut events, out);
                    self.scan_buffer = events;
                }
            }
            DeltaPart::Thinking { text, signature } => {
                self.saw_content = true;
                self.flush_scanner(out);
                if !matches!(self.open, Some((_, OpenBlock::Thinking { .. }))) {
                    self.open_block(
                        OpenBlock::Thinking {
                            thinking: String::new(),
                            signature: None,
                        },
                        out,
                    );
                }
                if let Some((index, OpenBlock::Thinking { thinking, .. })) = self.open.as_mut() {
                    if !text.is_empty() {
                        thinking.push_str(&text);
                        self.output_bytes += text.len();
                        out.push(StreamEvent::ContentBlockDelta {
                            index: *index,
                            delta: BlockDelta::ThinkingDelta { thinking: text },
                        });
                    }
                }
                if let Some(signature) = signature {
                    self.capture_signature(&signature);
                }
            }
            DeltaPart::ToolCall { id, name, args } => {
                self.saw_content = true;
                self.flush_scanner(out);
                let continues_open = match (&self.open, id.as_deref()) {
                    (Some((_, OpenBlock::ToolUse { id: open_id, .. })), Some(new_id)) => {
                        open_id == new_id
                    }
                    (Some((_, OpenBlock::ToolUse { .. })), None) => true,
                    _ => false,
                };
                if !continues_open {
                    self.open_block(
                        OpenBlock::ToolUse {
                            id: id.unwrap_or_else(next_tool_use_id),
                            name: name.unwrap_or_default(),
                            input_json: String::new(),
                        },
                        out,
                    );
                }
                if let Some((_, OpenBlock::ToolUse { input_json, .. })) = self.open.as_mut() {
                    match args {
                        ToolArgs::Fragment(fragment) => input_json.push_str(&fragment),
                        ToolArgs::Full(value) => *input_json = value.to_string(),
                        ToolArgs::None => {}
                    }
                }
            }
        }
    }

    fn apply_scan_events(&mut self, events: &mut Vec<ScanEvent>, out: &mut Vec<StreamEvent>) {
        for event in events.drain(..) {
            match event {
                ScanEvent::Text(text) => self.append_text(&text, out),
                ScanEvent::ToolCall(call) => self.emit_tool_call(call, out),
            }
        }
    }

    fn flush_scanner(&mut self, out: &mut Vec<StreamEvent>) {
        if self.options.passthrough || self.scanner.pending_len() == 0 {
            return;
        }
        let mut events = std::mem::take(&mut self.scan_buffer);
        self.scanner.finish(&mut events);
        self.apply_scan_events(&mut events, out);
        self.scan_buffer = events;
    }

    fn append_text(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        if !matches!(self.open, Some((_, OpenBlock::Text { .. }))) {
            self.open_block(
                OpenBlock::Text {
                    text: String::new(),
                },
                out,
            );
        }
        if let Some((index, OpenBlock::Text { text: acc })) = self.open.as_mut() {
            acc.push_str(text);
            self.output_bytes += text.len();
            out.push(StreamEvent::ContentBlockDelta {
                index: *index,
                delta: BlockDelta::TextDelta {
                    text: text.to_string(),
                },
            });
        }
    }

    /// A call extracted from text becomes a complete tool_use block at once.
    fn emit_tool_call(&mut self, call: ParsedToolCall, out: &mut Vec<StreamEvent>) {
        let ParsedToolCall { id, name, input } = call;
        tracing::debug!(tool = %name, "extracted tool call from text");
        self.open_block(
            OpenBlock::ToolUse {
                id: id.unwrap_or_else(next_tool_use_id),
                name,
                input_json: input.to_string(),
            },
            out,
        );
        self.close_open(out);
    }

    fn open_block(&mut self, block: OpenBlock, out: &mut Vec<StreamEvent>) {
        self.close_open(out);
        let index = self.next_index;
        self.next_index += 1;
        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: block.seed(),
        });
        self.open = Some((index, block));
    }

    fn close_open(&mut self, out: &mut Vec<StreamEvent>) {
        let Some((index, block)) = self.open.take() else {
            return;
        };
        let finished = match block {
            OpenBlock::Text { text } => ContentBlock::Text { text },
            OpenBlock::Thinking {
                thinking,
                signature,
            } => {
                if let Some(ref signature) = signature {
                    out.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::SignatureDelta {
                            signature: signature.clone(),
                        },
                    });
                }
                ContentBlock::Thinking {
                    thinking,
                    signature,
                }
            }
            OpenBlock::ToolUse {
                id,
                name,
                input_json,
            } => {
                let input = tool_input_value(&input_json);
                let partial_json = input.to_string();
                self.output_bytes += partial_json.len();
                out.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta { partial_json },
                });
                if let Some(ref signature) = self.signature {
                    self.signatures.store_tool_signature(&id, signature);
                }
                ContentBlock::ToolUse { id, name, input }
            }
        };
        out.push(StreamEvent::ContentBlockStop { index });
        self.blocks.push(finished);
    }

    /// Remember a continuity signature if it passes the length gate.
    fn capture_signature(&mut self, signature: &str) {
        if !self.signatures.is_usable(signature) {
            tracing::debug!(len = signature.len(), "ignoring short signature");
            return;
        }
        self.signature = Some(signature.to_string());
        self.signatures
            .store_signature_family(signature, &self.options.model);

        match self.open.as_mut() {
            Some((_, OpenBlock::Thinking { signature: slot, .. })) => {
                *slot = Some(signature.to_string());
            }
            _ => {
                // Late signature for a reasoning block that already closed.
                let last_thinking = self
                    .blocks
                    .iter_mut()
                    .rev()
                    .find(|b| matches!(b, ContentBlock::Thinking { .. }));
                if let Some(ContentBlock::Thinking { signature: slot, .. }) = last_thinking {
                    if slot.is_none() {
                        *slot = Some(signature.to_string());
                    }
                }
            }
        }
    }

    fn has_tool_use(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
            || matches!(self.open, Some((_, OpenBlock::ToolUse { .. })))
    }

    fn generated_text(&self) -> String {
        let mut text = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text: t } = block {
                text.push_str(t);
            }
        }
        if let Some((_, OpenBlock::Text { text: t })) = &self.open {
            text.push_str(t);
        }
        text
    }

    /// Stop reason by priority: tool use, backend signal, trailing stop
    /// sequence, token limit, end of turn.
    fn resolve_stop_reason(&self) -> (StopReason, Option<String>) {
        if self.has_tool_use() {
            return (StopReason::ToolUse, None);
        }
        if let Some(reason) = self
            .backend_stop_reason
            .as_deref()
            .and_then(backend_stop_to_canonical)
        {
            let sequence = if reason == StopReason::StopSequence {
                self.backend_stop_sequence
                    .clone()
                    .or_else(|| self.trailing_stop_sequence())
            } else {
                None
            };
            return (reason, sequence);
        }
        if let Some(sequence) = self.trailing_stop_sequence() {
            return (StopReason::StopSequence, Some(sequence));
        }
        if let Some(max) = self.options.max_tokens {
            if self.usage().output_tokens >= max {
                return (StopReason::MaxTokens, None);
            }
        }
        (StopReason::EndTurn, None)
    }

    fn trailing_stop_sequence(&self) -> Option<String> {
        let text = self.generated_text();
        self.options
            .stop_sequences
            .iter()
            .find(|seq| !seq.is_empty() && text.ends_with(seq.as_str()))
            .cloned()
    }

    /// Reported counts where the backend gave them, estimates otherwise.
    #[must_use]
    pub fn usage(&self) -> Usage {
        let estimated_output = estimate_tokens_for_bytes(self.output_bytes);
        merge_usage(
            self.reported_input_tokens,
            self.reported_output_tokens,
            self.options.estimated_input_tokens,
            estimated_output,
        )
    }

    /// Aggregated response from the current state.
    ///
    /// Before the turn has ended the open block is included as it stands and
    /// the stop reason is provisional.
    #[must_use]
    pub fn to_response(&self) -> MessagesResponse {
        let mut content = self.blocks.clone();
        if let Some((_, block)) = &self.open {
            content.push(block.snapshot());
        }
        let (reason, sequence) = self
            .resolved_stop
            .clone()
            .unwrap_or_else(|| self.resolve_stop_reason());
        MessagesResponse {
            id: self.message_id.clone(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: self.options.model.clone(),
            content,
            stop_reason: Some(reason.as_str().to_string()),
            stop_sequence: sequence,
            usage: self.usage(),
        }
    }

    /// Terminate if needed and return the aggregated response.
    #[must_use]
    pub fn into_response(mut self) -> MessagesResponse {
        let mut discarded = Vec::new();
        self.force_terminate(&mut discarded);
        self.to_response()
    }
}
