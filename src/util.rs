use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static ID_SEED: OnceLock<u64> = OnceLock::new();
const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn id_seed() -> u64 {
    *ID_SEED.get_or_init(|| fastrand::u64(..))
}

/// Process-unique identifier with the given prefix, e.g. `toolu_` or `msg_`.
///
/// Ids are a seeded counter mixed into 24 hex digits, so they are unique
/// within the process and unlikely to collide across restarts.
pub(crate) fn next_prefixed_id(prefix: &str) -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = id_seed();
    let mut out = String::with_capacity(prefix.len() + 24);
    out.push_str(prefix);
    push_u64_hex_16(&mut out, mix_u64(seed ^ seq));
    let tail = mix_u64(seq.rotate_left(17) ^ !seed);
    push_u64_hex_16(&mut out, tail);
    out.truncate(prefix.len() + 24);
    out
}

#[inline]
pub(crate) fn next_tool_use_id() -> String {
    next_prefixed_id("toolu_")
}

#[inline]
pub(crate) fn next_message_id() -> String {
    next_prefixed_id("msg_")
}

/// Random v4 UUID built from `fastrand` bytes.
pub(crate) fn random_uuid() -> uuid::Uuid {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&fastrand::u64(..).to_le_bytes());
    bytes[8..].copy_from_slice(&fastrand::u64(..).to_le_bytes());
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    match value.char_indices().nth(max_chars) {
        None => std::borrow::Cow::Borrowed(value),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + 3);
            out.push_str(&value[..cut]);
            out.push_str("...");
            std::borrow::Cow::Owned(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_ids_are_unique_and_shaped() {
        let a = next_tool_use_id();
        let b = next_tool_use_id();
        assert_ne!(a, b);
        assert!(a.starts_with("toolu_"));
        assert_eq!(a.len(), "toolu_".len() + 24);
        assert!(a["toolu_".len()..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(next_message_id().starts_with("msg_"));
    }

    #[test]
    fn random_uuid_is_v4() {
        let id = random_uuid();
        assert_eq!(id.get_version_num(), 4);
        assert_ne!(id, random_uuid());
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji 😀 café",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn truncate_chars_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }
}
