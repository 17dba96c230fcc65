use crate::protocol::canonical::{ContentBlock, RequestContext, Usage};
use std::time::Duration;
use tracing::info;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_bytes(text.len())
}

/// Same heuristic for a byte count already tallied elsewhere.
#[must_use]
pub fn estimate_tokens_for_bytes(bytes: usize) -> u64 {
    (bytes as u64).div_ceil(4)
}

/// Estimate the total input tokens for a request context.
///
/// Sums tokens from the system prompt, all textual blocks of messages,
/// and serialized tool definitions.
#[must_use]
pub fn estimate_request_tokens(request: &RequestContext) -> u64 {
    let mut total: u64 = 0;

    if let Some(ref system) = request.system_prompt {
        total += estimate_tokens(system);
    }

    for msg in &request.messages {
        for block in &msg.content {
            total += match block {
                ContentBlock::Text { text } => estimate_tokens(text),
                ContentBlock::Thinking { thinking, .. } => estimate_tokens(thinking),
                ContentBlock::ToolUse { name, input, .. } => {
                    estimate_tokens(name) + estimate_tokens(&input.to_string())
                }
                ContentBlock::ToolResult { content, .. } => match content {
                    serde_json::Value::String(text) => estimate_tokens(text),
                    other => estimate_tokens(&other.to_string()),
                },
                // Images and redacted reasoning are not counted via text tokenization
                ContentBlock::RedactedThinking { .. } | ContentBlock::Image { .. } => 0,
            };
        }
    }

    for tool in &request.tools {
        if let Ok(serialized) = serde_json::to_string(&tool.input_schema) {
            total += estimate_tokens(&serialized);
        }
        if let Some(ref desc) = tool.description {
            total += estimate_tokens(desc);
        }
        total += estimate_tokens(&tool.name);
    }

    total
}

/// Merge backend-reported counts with local estimates.
///
/// Reported non-zero values always win; missing or zero fields fall back to
/// the estimate.
#[must_use]
pub fn merge_usage(
    reported_input: Option<u64>,
    reported_output: Option<u64>,
    estimated_input: u64,
    estimated_output: u64,
) -> Usage {
    Usage {
        input_tokens: reported_input.filter(|v| *v > 0).unwrap_or(estimated_input),
        output_tokens: reported_output
            .filter(|v| *v > 0)
            .unwrap_or(estimated_output),
    }
}

/// Log token usage for a completed turn at INFO level.
pub fn log_request_usage(model: &str, usage: &Usage, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        total_tokens = usage.input_tokens + usage.output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "turn completed"
    );
}
