use super::canonical::{Role, StopReason};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn role_from_wire(s: &str) -> Role {
    match s {
        "assistant" | "model" => Role::Assistant,
        _ => Role::User, // fallback
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Map a backend stop signal onto a client stop reason.
///
/// Matching is case-insensitive; unknown values yield `None` so the caller
/// can fall through to its own inference.
#[must_use]
pub fn backend_stop_to_canonical(s: &str) -> Option<StopReason> {
    let s = s.trim();
    let matches = |candidates: &[&str]| candidates.iter().any(|c| s.eq_ignore_ascii_case(c));

    if matches(&["end_turn", "stop", "end", "eos", "finished", "complete"]) {
        Some(StopReason::EndTurn)
    } else if matches(&["max_tokens", "length", "max_output_tokens", "token_limit"]) {
        Some(StopReason::MaxTokens)
    } else if matches(&["stop_sequence", "stop_sequences", "stop_word"]) {
        Some(StopReason::StopSequence)
    } else if matches(&["tool_use", "tool_calls", "function_call", "tool_call"]) {
        Some(StopReason::ToolUse)
    } else {
        None
    }
}
