use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";

static LAST_CALL_ID_NANOS: AtomicU64 = AtomicU64::new(0);

#[inline]
fn unix_now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
        })
}

/// Claim a timestamp strictly greater than every one handed out before.
#[inline]
fn next_unique_nanos() -> u64 {
    let now = unix_now_nanos();
    let mut last = LAST_CALL_ID_NANOS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last.saturating_add(1));
        match LAST_CALL_ID_NANOS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

/// Synthesize a call id for providers that do not issue one: the function name
/// plus a nanosecond timestamp in hex.
pub(crate) fn synthesize_call_id(name: &str) -> String {
    let base = if name.is_empty() { "call" } else { name };
    let mut out = String::with_capacity(base.len() + 17);
    out.push_str(base);
    out.push('_');
    push_u64_hex_16(&mut out, next_unique_nanos());
    out
}

/// Whether an SSE data payload is the OpenAI-style end-of-stream marker.
#[inline]
pub(crate) fn is_done_payload(data: &str) -> bool {
    data.trim() == "[DONE]"
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    out.push('"');
    push_json_string_body(out, value);
    out.push('"');
}

/// Append `value` escaped for use inside a JSON string literal, without quotes.
#[inline]
pub(crate) fn push_json_string_body(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push_str(value);
        return;
    }

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
