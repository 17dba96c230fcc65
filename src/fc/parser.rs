// Tool-call markup dialect matchers.
//
// The scanner hands each matcher one complete block: the raw start tag (for
// attributes) and the body between the start tag and its closing tag. A
// matcher either yields one or more calls or rejects the block, in which case
// the scanner re-emits it verbatim as text.

use crate::error::BridgeError;
use crate::fc::repair::{parse_json_lenient, JsonRepair};
use memchr::{memchr, memmem};
use serde_json::Value;
use smallvec::SmallVec;
use std::borrow::Cow;
use tracing::debug;

/// A tool call recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    /// Id supplied by the markup itself, if it was well-formed.
    pub id: Option<String>,
    pub name: String,
    /// Always a JSON object.
    pub input: Value,
}

pub type ParsedCalls = SmallVec<[ParsedToolCall; 1]>;

/// Supported invocation markup dialects, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkupDialect {
    /// `<use_mcp_tool><server_name/><tool_name/><arguments/></use_mcp_tool>`
    McpBlock,
    /// `<tool_call>{"name": ..., "parameters": ...}</tool_call>`
    CompactCall,
    /// `<function_calls><invoke name=".."><parameter name="..">..</parameter></invoke></function_calls>`
    InvokeBlock,
    /// `<tool_use name="..">{...}</tool_use>`
    NamedToolUse,
}

/// The dialect the prompt instructs the model to use.
pub const PRIMARY_DIALECT: MarkupDialect = MarkupDialect::CompactCall;

impl MarkupDialect {
    pub const ALL: [MarkupDialect; 4] = [
        MarkupDialect::McpBlock,
        MarkupDialect::CompactCall,
        MarkupDialect::InvokeBlock,
        MarkupDialect::NamedToolUse,
    ];

    /// Bare tag name, without angle brackets.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            MarkupDialect::McpBlock => "use_mcp_tool",
            MarkupDialect::CompactCall => "tool_call",
            MarkupDialect::InvokeBlock => "function_calls",
            MarkupDialect::NamedToolUse => "tool_use",
        }
    }

    #[must_use]
    pub const fn close_tag(self) -> &'static str {
        match self {
            MarkupDialect::McpBlock => "</use_mcp_tool>",
            MarkupDialect::CompactCall => "</tool_call>",
            MarkupDialect::InvokeBlock => "</function_calls>",
            MarkupDialect::NamedToolUse => "</tool_use>",
        }
    }

    /// Parse one complete block of this dialect.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MarkupParse`] when the block does not describe
    /// a usable call (missing name, arguments that cannot be repaired into a
    /// JSON object, and so on).
    pub fn parse(self, start_tag: &str, body: &str) -> Result<ParsedCalls, BridgeError> {
        let calls = match self {
            MarkupDialect::McpBlock => parse_mcp_block(body)?,
            MarkupDialect::CompactCall => parse_compact_call(start_tag, body)?,
            MarkupDialect::InvokeBlock => parse_invoke_block(start_tag, body)?,
            MarkupDialect::NamedToolUse => parse_named_tool_use(start_tag, body)?,
        };
        if calls.is_empty() {
            return Err(markup_err(format!("<{}> block held no calls", self.tag())));
        }
        Ok(calls)
    }
}

fn markup_err(msg: impl Into<String>) -> BridgeError {
    BridgeError::MarkupParse(msg.into())
}

// ---------------------------------------------------------------------------
// Dialect 1: <use_mcp_tool>
// ---------------------------------------------------------------------------

fn parse_mcp_block(body: &str) -> Result<ParsedCalls, BridgeError> {
    let name = extract_xml_tag_text(body, b"<tool_name>", b"</tool_name>")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| markup_err("missing <tool_name> in <use_mcp_tool>"))?;
    if let Some(server) = extract_xml_tag_text(body, b"<server_name>", b"</server_name>") {
        debug!(server = server.trim(), tool = name, "[Markup] mcp tool block");
    }

    let input = match extract_xml_tag_text(body, b"<arguments>", b"</arguments>") {
        None => empty_object(),
        Some(raw) => parse_object_args(&unwrap_cdata(raw), name)?,
    };

    Ok(smallvec::smallvec![ParsedToolCall {
        id: None,
        name: name.to_string(),
        input,
    }])
}

// ---------------------------------------------------------------------------
// Dialect 2: <tool_call>{json}</tool_call>
// ---------------------------------------------------------------------------

const INPUT_KEYS: [&str; 3] = ["parameters", "arguments", "input"];

fn parse_compact_call(start_tag: &str, body: &str) -> Result<ParsedCalls, BridgeError> {
    let text = strip_code_fence(body.trim());
    if text.is_empty() {
        return Err(markup_err("empty <tool_call> body"));
    }
    let value = match parse_json_lenient(text) {
        JsonRepair::Clean(value) | JsonRepair::Repaired(value) => value,
        JsonRepair::Failed => return Err(markup_err("unrepairable JSON in <tool_call>")),
    };
    let tag_id = extract_attr_ascii(start_tag, b"id").and_then(normalize_call_id);

    match value {
        Value::Object(map) => {
            let call = compact_call_from_object(map, tag_id)?;
            Ok(smallvec::smallvec![call])
        }
        // Several calls written as siblings and wrapped during repair.
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => compact_call_from_object(map, None),
                _ => Err(markup_err("non-object entry in <tool_call> array")),
            })
            .collect(),
        _ => Err(markup_err("<tool_call> body is not a JSON object")),
    }
}

fn compact_call_from_object(
    mut map: serde_json::Map<String, Value>,
    tag_id: Option<String>,
) -> Result<ParsedToolCall, BridgeError> {
    let name = match map.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(markup_err("<tool_call> object has no string \"name\"")),
    };
    let id = tag_id.or_else(|| match map.get("id") {
        Some(Value::String(id)) => normalize_call_id(id),
        _ => None,
    });

    let raw_input = INPUT_KEYS.iter().find_map(|key| map.remove(*key));
    let input = match raw_input {
        None | Some(Value::Null) => empty_object(),
        Some(Value::Object(obj)) => Value::Object(obj),
        // Arguments serialized as a JSON string.
        Some(Value::String(encoded)) if encoded.trim().is_empty() => empty_object(),
        Some(Value::String(encoded)) => parse_object_args(&encoded, &name)?,
        Some(_) => {
            return Err(markup_err(format!(
                "arguments for '{name}' must be a JSON object"
            )))
        }
    };

    Ok(ParsedToolCall { id, name, input })
}

// ---------------------------------------------------------------------------
// Dialect 3: <function_calls>
// ---------------------------------------------------------------------------

fn parse_invoke_block(start_tag: &str, body: &str) -> Result<ParsedCalls, BridgeError> {
    match parse_invoke_block_fast(body) {
        Ok(calls) if !calls.is_empty() => Ok(calls),
        Ok(_) => parse_invoke_block_strict(start_tag, body),
        Err(err) => {
            debug!(error = %err, "[Markup] fast <function_calls> scan failed, retrying with XML reader");
            parse_invoke_block_strict(start_tag, body)
        }
    }
}

#[derive(Default)]
struct PendingInvoke {
    id: Option<String>,
    name: String,
    params: serde_json::Map<String, Value>,
}

#[derive(Default)]
struct PendingLegacyCall {
    id: Option<String>,
    name: String,
    args_text: Option<String>,
}

enum Capture {
    None,
    Parameter(String),
    LegacyTool,
    LegacyArgs,
}

/// XML reader path for blocks the byte scan could not split, e.g. start tags
/// spread over several lines with unusual quoting.
fn parse_invoke_block_strict(start_tag: &str, body: &str) -> Result<ParsedCalls, BridgeError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut xml = String::with_capacity(start_tag.len() + body.len() + 20);
    xml.push_str(start_tag);
    xml.push_str(body);
    xml.push_str(MarkupDialect::InvokeBlock.close_tag());

    let mut reader = Reader::from_str(&xml);
    let mut results = ParsedCalls::new();
    let mut invoke: Option<PendingInvoke> = None;
    let mut legacy: Option<PendingLegacyCall> = None;
    let mut capture = Capture::None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"invoke" => {
                    let name = xml_attr(e, b"name")
                        .filter(|name| !name.trim().is_empty())
                        .ok_or_else(|| markup_err("missing 'name' attribute on <invoke>"))?;
                    invoke = Some(PendingInvoke {
                        id: xml_attr(e, b"id").as_deref().and_then(normalize_call_id),
                        name: name.trim().to_string(),
                        params: serde_json::Map::new(),
                    });
                }
                b"parameter" if invoke.is_some() => {
                    let name = xml_attr(e, b"name")
                        .ok_or_else(|| markup_err("missing 'name' attribute on <parameter>"))?;
                    capture = Capture::Parameter(name);
                    text.clear();
                }
                b"function_call" => {
                    legacy = Some(PendingLegacyCall {
                        id: xml_attr(e, b"id").as_deref().and_then(normalize_call_id),
                        name: xml_attr(e, b"name").unwrap_or_default(),
                        args_text: None,
                    });
                }
                b"tool" if legacy.is_some() => {
                    capture = Capture::LegacyTool;
                    text.clear();
                }
                tag if legacy.is_some() && is_args_tag(tag) => {
                    capture = Capture::LegacyArgs;
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"parameter" => {
                    if let (Capture::Parameter(name), Some(pending)) =
                        (std::mem::replace(&mut capture, Capture::None), invoke.as_mut())
                    {
                        pending.params.insert(name, coerce_json_value(&text));
                    }
                }
                b"invoke" => {
                    if let Some(pending) = invoke.take() {
                        results.push(ParsedToolCall {
                            id: pending.id,
                            name: pending.name,
                            input: Value::Object(pending.params),
                        });
                    }
                }
                b"tool" => {
                    if let (Capture::LegacyTool, Some(pending)) =
                        (std::mem::replace(&mut capture, Capture::None), legacy.as_mut())
                    {
                        pending.name = text.trim().to_string();
                    }
                }
                tag if is_args_tag(tag) => {
                    if let (Capture::LegacyArgs, Some(pending)) =
                        (std::mem::replace(&mut capture, Capture::None), legacy.as_mut())
                    {
                        pending.args_text = Some(std::mem::take(&mut text));
                    }
                }
                b"function_call" => {
                    if let Some(pending) = legacy.take() {
                        results.push(legacy_call(pending)?);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if !matches!(capture, Capture::None) {
                    match e.unescape() {
                        Ok(cow) => text.push_str(&cow),
                        Err(_) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if !matches!(capture, Capture::None) {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(markup_err(format!("XML parse error: {e}"))),
            _ => {}
        }
    }

    Ok(results)
}

fn xml_attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn legacy_call(pending: PendingLegacyCall) -> Result<ParsedToolCall, BridgeError> {
    let name = pending.name.trim();
    if name.is_empty() {
        return Err(markup_err("missing <tool> in <function_call>"));
    }
    let input = match pending.args_text.as_deref().map(str::trim) {
        None | Some("") => empty_object(),
        Some(raw) => parse_object_args(raw, name)?,
    };
    Ok(ParsedToolCall {
        id: pending.id,
        name: name.to_string(),
        input,
    })
}

/// Byte scan over `<invoke>` and legacy `<function_call>` blocks.
///
/// Parameter values are taken verbatim between their tags, so raw `<` or `&`
/// inside code arguments survive.
fn parse_invoke_block_fast(body: &str) -> Result<ParsedCalls, BridgeError> {
    const INVOKE_OPEN: &[u8] = b"<invoke";
    const INVOKE_CLOSE: &[u8] = b"</invoke>";
    const FUNCTION_CALL_OPEN: &[u8] = b"<function_call";
    const FUNCTION_CALL_CLOSE: &[u8] = b"</function_call>";
    const PARAMETER_OPEN: &[u8] = b"<parameter";
    const PARAMETER_CLOSE: &[u8] = b"</parameter>";

    let bytes = body.as_bytes();
    let mut cursor = 0usize;
    let mut results = ParsedCalls::new();

    while let Some(rel_lt) = memchr(b'<', &bytes[cursor..]) {
        let block_start = cursor + rel_lt;
        let rest = &bytes[block_start..];
        let (close, is_invoke) = if tag_starts_at(rest, INVOKE_OPEN) {
            (INVOKE_CLOSE, true)
        } else if tag_starts_at(rest, FUNCTION_CALL_OPEN) {
            (FUNCTION_CALL_CLOSE, false)
        } else {
            cursor = block_start + 1;
            continue;
        };

        let tag_end = block_start
            + memchr(b'>', rest).ok_or_else(|| markup_err("unterminated start tag"))?;
        let start_tag = body
            .get(block_start..=tag_end)
            .ok_or_else(|| markup_err("invalid utf-8 boundary in start tag"))?;
        let content_start = tag_end + 1;
        let content_end = content_start
            + memmem::find(&bytes[content_start..], close)
                .ok_or_else(|| markup_err("unterminated call block"))?;
        let inner = body
            .get(content_start..content_end)
            .ok_or_else(|| markup_err("invalid utf-8 boundary in call block"))?;
        cursor = content_end + close.len();

        let id = extract_attr_ascii(start_tag, b"id").and_then(normalize_call_id);
        if !is_invoke {
            let name = extract_xml_tag_text(inner, b"<tool>", b"</tool>")
                .map(ToOwned::to_owned)
                .or_else(|| extract_attr_ascii(start_tag, b"name").map(ToOwned::to_owned))
                .unwrap_or_default();
            let args_text = extract_first_args_tag_text(inner).map(|raw| {
                let unwrapped = unwrap_cdata(raw);
                decode_xml_entities(unwrapped.as_ref()).into_owned()
            });
            results.push(legacy_call(PendingLegacyCall {
                id,
                name,
                args_text,
            })?);
            continue;
        }

        let name = extract_attr_ascii(start_tag, b"name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| markup_err("missing name attribute on <invoke>"))?;
        let inner_bytes = inner.as_bytes();
        let mut params = serde_json::Map::with_capacity(2);
        let mut param_cursor = 0usize;
        while let Some(open_rel) = memmem::find(&inner_bytes[param_cursor..], PARAMETER_OPEN) {
            let param_start = param_cursor + open_rel;
            let param_tag_end = param_start
                + memchr(b'>', &inner_bytes[param_start..])
                    .ok_or_else(|| markup_err("malformed <parameter> start tag"))?;
            let param_tag = inner
                .get(param_start..=param_tag_end)
                .ok_or_else(|| markup_err("invalid utf-8 boundary in <parameter>"))?;
            let value_start = param_tag_end + 1;
            let value_end = value_start
                + memmem::find(&inner_bytes[value_start..], PARAMETER_CLOSE)
                    .ok_or_else(|| markup_err("unterminated <parameter>"))?;
            param_cursor = value_end + PARAMETER_CLOSE.len();

            let Some(param_name) = extract_attr_ascii(param_tag, b"name") else {
                continue;
            };
            let raw_value = inner
                .get(value_start..value_end)
                .ok_or_else(|| markup_err("invalid utf-8 boundary in <parameter> value"))?;
            let value = if memmem::find(raw_value.as_bytes(), b"<![CDATA[").is_some() {
                coerce_json_value(&unwrap_cdata(raw_value))
            } else {
                coerce_json_value(&decode_xml_entities(raw_value))
            };
            params.insert(param_name.to_string(), value);
        }

        results.push(ParsedToolCall {
            id,
            name: name.to_string(),
            input: Value::Object(params),
        });
    }

    Ok(results)
}

#[inline]
fn tag_starts_at(bytes: &[u8], open: &[u8]) -> bool {
    bytes.starts_with(open)
        && bytes
            .get(open.len())
            .is_some_and(|&b| b == b'>' || b.is_ascii_whitespace())
}

#[inline]
fn is_args_tag(tag: &[u8]) -> bool {
    matches!(tag, b"args_json" | b"arguments" | b"parameters")
}

#[inline]
fn extract_first_args_tag_text(block: &str) -> Option<&str> {
    extract_xml_tag_text(block, b"<args_json>", b"</args_json>")
        .or_else(|| extract_xml_tag_text(block, b"<arguments>", b"</arguments>"))
        .or_else(|| extract_xml_tag_text(block, b"<parameters>", b"</parameters>"))
}

// ---------------------------------------------------------------------------
// Dialect 4: <tool_use name="..">{json}</tool_use>
// ---------------------------------------------------------------------------

fn parse_named_tool_use(start_tag: &str, body: &str) -> Result<ParsedCalls, BridgeError> {
    let name = extract_attr_ascii(start_tag, b"name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| markup_err("missing name attribute on <tool_use>"))?;
    let id = extract_attr_ascii(start_tag, b"id").and_then(normalize_call_id);
    let text = strip_code_fence(body.trim());
    let input = if text.is_empty() {
        empty_object()
    } else {
        parse_object_args(text, name)?
    };
    Ok(smallvec::smallvec![ParsedToolCall {
        id,
        name: name.to_string(),
        input,
    }])
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse (and if needed repair) an argument payload that must be an object.
fn parse_object_args(raw: &str, tool: &str) -> Result<Value, BridgeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(empty_object());
    }
    match parse_json_lenient(trimmed) {
        JsonRepair::Clean(Value::Object(map)) | JsonRepair::Repaired(Value::Object(map)) => {
            Ok(Value::Object(map))
        }
        JsonRepair::Clean(other) | JsonRepair::Repaired(other) => Err(markup_err(format!(
            "arguments for '{tool}' must be a JSON object, got {}",
            kind_label(&other)
        ))),
        JsonRepair::Failed => Err(markup_err(format!(
            "arguments for '{tool}' are not valid JSON"
        ))),
    }
}

#[inline]
pub(crate) fn extract_attr_ascii<'a>(tag: &'a str, attr: &[u8]) -> Option<&'a str> {
    let bytes = tag.as_bytes();
    let mut search_from = 0usize;
    while let Some(rel_name) = memmem::find(&bytes[search_from..], attr) {
        let name_start = search_from + rel_name;
        let name_end = name_start + attr.len();
        if name_start > 0 && is_ascii_attr_char(bytes[name_start - 1]) {
            search_from = name_start + 1;
            continue;
        }
        if bytes.get(name_end).copied().is_some_and(is_ascii_attr_char) {
            search_from = name_start + 1;
            continue;
        }
        let mut idx = name_end;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        if bytes.get(idx) != Some(&b'=') {
            search_from = name_start + 1;
            continue;
        }
        idx += 1;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        let quote = *bytes.get(idx)?;
        if quote != b'"' && quote != b'\'' {
            search_from = name_start + 1;
            continue;
        }
        let value_start = idx + 1;
        let value_end = value_start + memchr(quote, &bytes[value_start..])?;
        return tag.get(value_start..value_end).map(str::trim);
    }
    None
}

#[inline]
const fn is_ascii_attr_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':')
}

/// Accept only ids that are safe to echo back to the client.
#[inline]
fn normalize_call_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return None;
    }
    trimmed
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-'))
        .then(|| trimmed.to_string())
}

#[inline]
fn extract_xml_tag_text<'a>(text: &'a str, open: &[u8], close: &[u8]) -> Option<&'a str> {
    let bytes = text.as_bytes();
    let start = memmem::find(bytes, open)?;
    let content_start = start + open.len();
    let end_rel = memmem::find(&bytes[content_start..], close)?;
    text.get(content_start..content_start + end_rel)
}

/// Drop a surrounding markdown fence such as "```json ... ```".
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match memchr(b'\n', rest.as_bytes()) {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn unwrap_cdata(text: &str) -> Cow<'_, str> {
    const CDATA_OPEN: &[u8] = b"<![CDATA[";
    const CDATA_CLOSE: &[u8] = b"]]>";

    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut cursor = 0usize;

    while let Some(open_rel) = memmem::find(&bytes[cursor..], CDATA_OPEN) {
        let open = cursor + open_rel;
        let content_start = open + CDATA_OPEN.len();
        let Some(close_rel) = memmem::find(&bytes[content_start..], CDATA_CLOSE) else {
            return Cow::Borrowed(text);
        };
        let content_end = content_start + close_rel;
        let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
        buf.push_str(&text[cursor..open]);
        buf.push_str(&text[content_start..content_end]);
        cursor = content_end + CDATA_CLOSE.len();
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[cursor..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

/// Decode the five predefined XML entities.
fn decode_xml_entities(text: &str) -> Cow<'_, str> {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];

    let bytes = text.as_bytes();
    let Some(first_amp) = memchr(b'&', bytes) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first_amp]);
    let mut i = first_amp;
    while i < bytes.len() {
        let rest = &text[i..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, ch)) => {
                out.push(*ch);
                i += entity.len();
            }
            None => {
                out.push('&');
                i += 1;
            }
        }
        let next = memchr(b'&', &bytes[i..]).map_or(bytes.len(), |rel| i + rel);
        out.push_str(&text[i..next]);
        i = next;
    }
    Cow::Owned(out)
}

/// If a parameter value looks like JSON, parse it (repairing when needed).
/// Otherwise, or when that fails, keep it as a string.
fn coerce_json_value(s: &str) -> Value {
    let trimmed = s.trim();
    if should_attempt_json_parse(trimmed) {
        if let Some(value) = parse_json_lenient(trimmed).into_value() {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

#[inline]
fn should_attempt_json_parse(trimmed: &str) -> bool {
    let Some(first) = trimmed.as_bytes().first().copied() else {
        return false;
    };
    matches!(first, b'{' | b'[' | b'-' | b'0'..=b'9')
        || matches!(trimmed, "true" | "false" | "null")
}

#[inline]
fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn kind_label(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
