//! Escape codec for service-message attribute values.
//!
//! TeamCity reserves `|`, `'`, `[`, `]` and line breaks inside quoted values. Each is written as a two-character
//! sequence introduced by `|`. Decoding is a single left-to-right scan, so an escaped pipe followed by `n` (`||n`)
//! decodes to the literal text `|n` and never to a newline.

/// The escape introducer.
const INTRODUCER: char = '|';

/// `(raw, encoded)` pairs. The introducer itself comes first.
const ESCAPES: [(char, char); 6] = [('|', '|'), ('\'', '\''), ('\n', 'n'), ('\r', 'r'), (']', ']'), ('[', '[')];

/// Escape a raw value for use inside `key='...'`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == ch) {
            Some((_, code)) => {
                out.push(INTRODUCER);
                out.push(*code);
            }
            None => out.push(ch),
        }
    }
    out
}

/// Decode an escaped attribute value.
///
/// Unknown sequences are kept as-is, including a trailing lone `|`. The `|0xXXXX` form is decoded to the
/// corresponding Unicode scalar when it names one.
pub fn unescape(value: &str) -> String {
    if !value.contains(INTRODUCER) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find(INTRODUCER) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + INTRODUCER.len_utf8()..];
        let mut chars = after.chars();
        match chars.next() {
            Some(code) => {
                if let Some((raw, _)) = ESCAPES.iter().find(|(_, c)| *c == code) {
                    out.push(*raw);
                    rest = chars.as_str();
                } else if let Some((ch, consumed)) = decode_unicode(after) {
                    out.push(ch);
                    rest = &after[consumed..];
                } else {
                    out.push(INTRODUCER);
                    rest = after;
                }
            }
            None => {
                out.push(INTRODUCER);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode `0xXXXX` at the start of `input`, returning the char and the bytes consumed.
fn decode_unicode(input: &str) -> Option<(char, usize)> {
    let hex = input.strip_prefix("0x")?;
    let digits = hex.get(..4)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let code = u32::from_str_radix(digits, 16).ok()?;
    char::from_u32(code).map(|ch| (ch, 6))
}
