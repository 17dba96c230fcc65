use memchr::{memchr, memmem};
use tracing::{debug, warn};

use crate::fc::parser::{MarkupDialect, ParsedToolCall, PRIMARY_DIALECT};

// Streaming tool-call markup scanner.
//
// Text deltas from the backend are fed in arbitrary chunks. The scanner emits
// plain text as early as it safely can and holds back only what might still
// turn into a supported start tag, or a started block whose closing tag has
// not arrived yet.
//
// An occurrence is literal (never parsed) when:
// - the tag name is directly followed by a quote or backtick,
// - a backtick sits directly before the `<`,
// - the whole start tag is wrapped in matching `"` or `'` quotes,
// - it appears inside a fenced code block (a run of three or more backticks).
//
// The pending buffer is capped; past the cap everything held is flushed as
// text.

/// Output of the scanner, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Text(String),
    ToolCall(ParsedToolCall),
}

const DEFAULT_MAX_PENDING: usize = 512 * 1024;

#[derive(Debug, Default, Clone, Copy)]
struct FenceTracker {
    backtick_run: usize,
    open: bool,
}

impl FenceTracker {
    fn observe(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'`' {
                self.backtick_run += 1;
            } else {
                if self.backtick_run >= 3 {
                    self.open = !self.open;
                }
                self.backtick_run = 0;
            }
        }
    }
}

/// A block whose start tag is complete but whose closing tag is still
/// missing; `pending` begins with its start tag.
#[derive(Debug, Clone, Copy)]
struct HeldBlock {
    dialect: MarkupDialect,
    searched_to: usize,
}

enum TagMatch {
    /// Not a supported start tag.
    None,
    /// Tag name followed by a quote or backtick.
    Literal,
    /// The rest of the buffer could still become a supported tag.
    Incomplete,
    /// A complete start tag; `end` is the offset just past its `>`.
    Open { dialect: MarkupDialect, end: usize },
}

/// Streaming detector for embedded tool-call markup.
#[derive(Debug)]
pub struct MarkupScanner {
    pending: String,
    max_pending: usize,
    fence: FenceTracker,
    last_byte: Option<u8>,
    held: Option<HeldBlock>,
}

impl Default for MarkupScanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl MarkupScanner {
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: String::new(),
            max_pending,
            fence: FenceTracker::default(),
            last_byte: None,
            held: None,
        }
    }

    /// Bytes currently held back.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one text delta.
    pub fn push(&mut self, text: &str, out: &mut Vec<ScanEvent>) {
        if text.is_empty() {
            return;
        }

        // Fast path: nothing held and no tag can start in this chunk.
        if self.pending.is_empty() && memchr(b'<', text.as_bytes()).is_none() {
            self.emit_text(text, out);
            return;
        }

        self.pending.push_str(text);
        self.drain(false, out);

        if self.pending.len() > self.max_pending {
            warn!(
                held_bytes = self.pending.len(),
                limit = self.max_pending,
                "[MarkupScanner] pending buffer overflow, flushing as text"
            );
            let flushed = std::mem::take(&mut self.pending);
            self.held = None;
            self.emit_text(&flushed, out);
        }
    }

    /// End of stream: resolve everything still held.
    ///
    /// An unclosed block of the primary dialect is closed implicitly (the
    /// backend stops on its closing tag); anything else is emitted as text.
    pub fn finish(&mut self, out: &mut Vec<ScanEvent>) {
        if self.pending.is_empty() {
            return;
        }
        self.drain(true, out);
        let rest = std::mem::take(&mut self.pending);
        self.held = None;
        self.emit_text(&rest, out);
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<ScanEvent>) {
        if text.is_empty() {
            return;
        }
        self.fence.observe(text.as_bytes());
        self.last_byte = text.as_bytes().last().copied();
        match out.last_mut() {
            Some(ScanEvent::Text(prev)) => prev.push_str(text),
            _ => out.push(ScanEvent::Text(text.to_string())),
        }
    }

    /// Consume as much of `pending` as can be decided now.
    fn drain(&mut self, at_end: bool, out: &mut Vec<ScanEvent>) {
        let pending = std::mem::take(&mut self.pending);
        let bytes = pending.as_bytes();
        let mut text_start = 0usize;
        let mut cursor = 0usize;
        let mut held_from: Option<usize> = None;

        while let Some(rel) = memchr(b'<', &bytes[cursor..]) {
            let lt = cursor + rel;

            // Fence state must reflect everything before this `<`.
            let before = &pending[text_start..lt];
            let mut fence = self.fence;
            fence.observe(before.as_bytes());
            let prev_byte = if lt > text_start {
                bytes.get(lt - 1).copied()
            } else {
                self.last_byte
            };
            if fence.open || fence.backtick_run > 0 || prev_byte == Some(b'`') {
                cursor = lt + 1;
                continue;
            }

            let (dialect, open_end) = match classify_tag(&bytes[lt..]) {
                TagMatch::None | TagMatch::Literal => {
                    cursor = lt + 1;
                    continue;
                }
                TagMatch::Incomplete => {
                    if at_end {
                        cursor = lt + 1;
                        continue;
                    }
                    self.held = None;
                    held_from = Some(lt);
                    break;
                }
                TagMatch::Open { dialect, end } => (dialect, lt + end),
            };

            // A start tag wrapped in matching quotes is a mention.
            if let Some(quote @ (b'"' | b'\'')) = prev_byte {
                match bytes.get(open_end) {
                    Some(&next) if next == quote => {
                        cursor = open_end;
                        continue;
                    }
                    None if !at_end => {
                        self.held = None;
                        held_from = Some(lt);
                        break;
                    }
                    _ => {}
                }
            }

            let close = dialect.close_tag();
            let search_from = match self.held {
                Some(held) if lt == 0 && held.dialect == dialect => held
                    .searched_to
                    .saturating_sub(close.len() - 1)
                    .max(open_end),
                _ => open_end,
            };
            match memmem::find(&bytes[search_from..], close.as_bytes()) {
                Some(rel_close) => {
                    let close_start = search_from + rel_close;
                    let close_end = close_start + close.len();
                    self.emit_text(&pending[text_start..lt], out);
                    self.held = None;
                    self.resolve_block(
                        dialect,
                        &pending[lt..open_end],
                        &pending[open_end..close_start],
                        &pending[lt..close_end],
                        out,
                    );
                    text_start = close_end;
                    cursor = close_end;
                }
                None if at_end && dialect == PRIMARY_DIALECT => {
                    self.emit_text(&pending[text_start..lt], out);
                    self.held = None;
                    let body = strip_partial_close(&pending[open_end..], close);
                    debug!("[MarkupScanner] closing unterminated primary block at end of stream");
                    self.resolve_block(dialect, &pending[lt..open_end], body, &pending[lt..], out);
                    text_start = pending.len();
                    cursor = pending.len();
                }
                None if at_end => {
                    cursor = lt + 1;
                }
                None => {
                    // Remember how far we looked so the next chunk resumes there.
                    self.held = Some(HeldBlock {
                        dialect,
                        searched_to: pending.len() - lt,
                    });
                    held_from = Some(lt);
                    break;
                }
            }
        }

        match held_from {
            Some(hold) => {
                self.emit_text(&pending[text_start..hold], out);
                self.pending = pending[hold..].to_string();
            }
            None => {
                self.held = None;
                self.emit_text(&pending[text_start..], out);
            }
        }
    }

    fn resolve_block(
        &mut self,
        dialect: MarkupDialect,
        start_tag: &str,
        body: &str,
        whole: &str,
        out: &mut Vec<ScanEvent>,
    ) {
        match dialect.parse(start_tag, body) {
            Ok(calls) => {
                debug!(
                    dialect = dialect.tag(),
                    calls = calls.len(),
                    "[MarkupScanner] extracted tool calls"
                );
                out.extend(calls.into_iter().map(ScanEvent::ToolCall));
                self.last_byte = whole.as_bytes().last().copied();
            }
            Err(err) => {
                debug!(dialect = dialect.tag(), error = %err, "[MarkupScanner] keeping markup as text");
                self.emit_text(whole, out);
            }
        }
    }
}

/// Classify the bytes starting at a `<`.
fn classify_tag(bytes: &[u8]) -> TagMatch {
    let rest = &bytes[1..];
    let mut incomplete = false;
    let mut literal = false;

    for dialect in MarkupDialect::ALL {
        let tag = dialect.tag().as_bytes();
        if rest.len() < tag.len() {
            if tag.starts_with(rest) {
                incomplete = true;
            }
            continue;
        }
        if !rest.starts_with(tag) {
            continue;
        }
        match rest.get(tag.len()).copied() {
            None => incomplete = true,
            Some(b'"' | b'\'' | b'`') => literal = true,
            Some(b) if b == b'>' || b.is_ascii_whitespace() => {
                return match start_tag_end(bytes) {
                    StartTagEnd::Found(end) => TagMatch::Open { dialect, end },
                    StartTagEnd::Incomplete => TagMatch::Incomplete,
                    StartTagEnd::Invalid => TagMatch::None,
                };
            }
            Some(_) => {}
        }
    }

    if incomplete {
        TagMatch::Incomplete
    } else if literal {
        TagMatch::Literal
    } else {
        TagMatch::None
    }
}

enum StartTagEnd {
    Found(usize),
    Incomplete,
    Invalid,
}

const MAX_START_TAG_LEN: usize = 256;

/// Locate the `>` ending a start tag, honouring quoted attribute values.
fn start_tag_end(bytes: &[u8]) -> StartTagEnd {
    let mut quote: Option<u8> = None;
    for (idx, &byte) in bytes.iter().enumerate().skip(1) {
        if idx > MAX_START_TAG_LEN {
            return StartTagEnd::Invalid;
        }
        match quote {
            Some(q) if byte == q => quote = None,
            Some(_) => {}
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'>' if bytes[idx - 1] == b'/' => return StartTagEnd::Invalid,
                b'>' => return StartTagEnd::Found(idx + 1),
                b'<' | b'\n' => return StartTagEnd::Invalid,
                _ => {}
            },
        }
    }
    StartTagEnd::Incomplete
}

/// Drop a trailing fragment of `close` left behind when the backend cut the
/// stream mid-tag.
fn strip_partial_close<'a>(body: &'a str, close: &str) -> &'a str {
    let trimmed = body.trim_end();
    for cut in (1..close.len()).rev() {
        if trimmed.ends_with(&close[..cut]) {
            return &trimmed[..trimmed.len() - cut];
        }
    }
    body
}
