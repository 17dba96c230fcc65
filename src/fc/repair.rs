// Deterministic repair of malformed JSON emitted inside tool-call markup.
//
// Models routinely produce three kinds of breakage:
// - several objects written as siblings under one key, with no enclosing array
// - literal double quotes inside a string value
// - raw line breaks and tabs inside strings
//
// Each pass is a single byte scan that only inserts characters, so the data
// the model produced is never dropped.

use serde_json::Value;
use tracing::debug;

/// Result of a lenient JSON parse.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRepair {
    /// The text was valid JSON as written.
    Clean(Value),
    /// The text parsed only after one or more repair passes.
    Repaired(Value),
    /// No repair produced valid JSON.
    Failed,
}

impl JsonRepair {
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            JsonRepair::Clean(value) | JsonRepair::Repaired(value) => Some(value),
            JsonRepair::Failed => None,
        }
    }
}

/// Parse `raw` as JSON, falling back to the repair passes in a fixed order.
#[must_use]
pub fn parse_json_lenient(raw: &str) -> JsonRepair {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return JsonRepair::Clean(value);
    }

    let wrapped = wrap_sibling_objects(trimmed);
    if let Some(ref candidate) = wrapped {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            debug!("[JsonRepair] wrapped sibling objects into an array");
            return JsonRepair::Repaired(value);
        }
    }

    let escaped = escape_string_contents(trimmed);
    if let Some(ref candidate) = escaped {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            debug!("[JsonRepair] escaped string contents");
            return JsonRepair::Repaired(value);
        }
    }

    // Both kinds of damage at once; try the passes in either order.
    if let Some(ref wrapped) = wrapped {
        if let Some(candidate) = escape_string_contents(wrapped) {
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                debug!("[JsonRepair] wrapped siblings then escaped strings");
                return JsonRepair::Repaired(value);
            }
        }
    }
    if let Some(ref escaped) = escaped {
        if let Some(candidate) = wrap_sibling_objects(escaped) {
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                debug!("[JsonRepair] escaped strings then wrapped siblings");
                return JsonRepair::Repaired(value);
            }
        }
    }

    JsonRepair::Failed
}

struct Frame {
    start: usize,
    is_object: bool,
    wrappable: bool,
    in_run: bool,
}

/// Wrap runs of comma-separated sibling objects in `[...]`.
///
/// An object qualifies when it is a property value (follows `:`) or sits at
/// the top level. Returns `None` when nothing needed wrapping.
#[must_use]
pub fn wrap_sibling_objects(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut inserts: Vec<(usize, u8)> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut prev_sig: Option<u8> = None;
    let mut continue_run = false;

    for (i, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
                prev_sig = Some(b'"');
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => {
                let top_level = stack.is_empty();
                let wrappable = continue_run || prev_sig == Some(b':') || top_level;
                stack.push(Frame {
                    start: i,
                    is_object: true,
                    wrappable,
                    in_run: continue_run,
                });
                continue_run = false;
                prev_sig = Some(byte);
            }
            b'[' => {
                stack.push(Frame {
                    start: i,
                    is_object: false,
                    wrappable: false,
                    in_run: false,
                });
                continue_run = false;
                prev_sig = Some(byte);
            }
            b'}' | b']' => {
                let frame = stack.pop()?;
                if frame.is_object != (byte == b'}') {
                    return None;
                }
                if frame.wrappable {
                    if followed_by_sibling_object(bytes, i + 1) {
                        if !frame.in_run {
                            inserts.push((frame.start, b'['));
                        }
                        continue_run = true;
                    } else if frame.in_run {
                        inserts.push((i + 1, b']'));
                    }
                }
                prev_sig = Some(byte);
            }
            b' ' | b'\n' | b'\r' | b'\t' => {}
            _ => {
                if byte != b',' {
                    continue_run = false;
                }
                prev_sig = Some(byte);
            }
        }
    }

    if inserts.is_empty() {
        return None;
    }
    inserts.sort_by_key(|&(pos, _)| pos);

    let mut out = String::with_capacity(text.len() + inserts.len());
    let mut cursor = 0usize;
    for (pos, ch) in inserts {
        out.push_str(&text[cursor..pos]);
        out.push(char::from(ch));
        cursor = pos;
    }
    out.push_str(&text[cursor..]);
    Some(out)
}

fn followed_by_sibling_object(bytes: &[u8], from: usize) -> bool {
    let mut idx = skip_ws(bytes, from);
    if bytes.get(idx) != Some(&b',') {
        return false;
    }
    idx = skip_ws(bytes, idx + 1);
    bytes.get(idx) == Some(&b'{')
}

#[inline]
fn skip_ws(bytes: &[u8], mut idx: usize) -> usize {
    while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
        idx += 1;
    }
    idx
}

/// Escape stray quotes and raw control whitespace inside string literals.
///
/// A quote inside a string only terminates it when the next significant byte
/// is structural: `:`, `}`, `]`, end of input, or a `,` that starts another
/// member or element. Every other quote is taken as content and escaped.
#[must_use]
pub fn escape_string_contents(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 16);
    let mut changed = false;
    let mut in_string = false;
    let mut cursor = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let byte = bytes[i];
        if !in_string {
            if byte == b'"' {
                in_string = true;
            }
            i += 1;
            continue;
        }

        let replacement: Option<&str> = match byte {
            b'\\' => {
                // Keep escape pairs intact.
                i += 2;
                continue;
            }
            b'"' => {
                if quote_terminates_string(bytes, i + 1) {
                    in_string = false;
                    None
                } else {
                    Some("\\\"")
                }
            }
            b'\n' => Some("\\n"),
            b'\r' => Some("\\r"),
            b'\t' => Some("\\t"),
            _ => None,
        };

        if let Some(replacement) = replacement {
            out.push_str(&text[cursor..i]);
            out.push_str(replacement);
            cursor = i + 1;
            changed = true;
        }
        i += 1;
    }

    if !changed {
        return None;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    Some(out)
}

fn quote_terminates_string(bytes: &[u8], from: usize) -> bool {
    let idx = skip_ws(bytes, from);
    match bytes.get(idx) {
        None | Some(b':' | b'}' | b']') => true,
        Some(b',') => {
            let next = skip_ws(bytes, idx + 1);
            match bytes.get(next) {
                None => true,
                Some(&b) => matches!(b, b'"' | b'{' | b'[' | b'-' | b't' | b'f' | b'n')
                    || b.is_ascii_digit(),
            }
        }
        _ => false,
    }
}
