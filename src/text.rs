//! Text cleanup: mojibake repair, escape scrubbing and bounded truncation.
//!
//! Nothing in this module fails. Every function returns its input (or a
//! cleaned copy of it) no matter what bytes it is given.

use encoding_rs::WINDOWS_1252;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Rounds of repair attempted; two covers text that was mis-decoded twice.
const MOJIBAKE_ROUNDS: usize = 2;

/// Reverse UTF-8 text that was decoded as Windows-1252 / Latin-1.
///
/// Each round re-encodes the string as Windows-1252 and decodes the bytes as
/// UTF-8, both strictly. The first round that fails (or changes nothing) ends
/// the repair and the last good string is returned, so correct text, including
/// any ASCII-only text, comes back unchanged.
///
/// ```ignore
/// assert_eq!(fix_mojibake("Israel â€” Egypt"), "Israel — Egypt");
/// ```
pub fn fix_mojibake(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut current = text.to_string();
    for _ in 0..MOJIBAKE_ROUNDS {
        match redecode_once(&current) {
            Some(repaired) if repaired != current => current = repaired,
            _ => break,
        }
    }
    current
}

/// [`fix_mojibake`] applied to every string inside a JSON value.
pub fn fix_mojibake_json(value: &mut Value) {
    match value {
        Value::String(s) if !s.is_ascii() => *s = fix_mojibake(s),
        Value::Array(items) => items.iter_mut().for_each(fix_mojibake_json),
        Value::Object(map) => map.values_mut().for_each(fix_mojibake_json),
        _ => {}
    }
}

fn redecode_once(text: &str) -> Option<String> {
    let (bytes, _, unmappable) = WINDOWS_1252.encode(text);
    if unmappable {
        return None;
    }
    String::from_utf8(bytes.into_owned()).ok()
}

/// Undo literal escape sequences and collapse whitespace to single spaces.
///
/// Scraped paragraph text sometimes carries `\n`, `\t` or escaped quotes as
/// two-character sequences; those are turned back into the characters they
/// name before whitespace is normalized.
pub fn scrub_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('n') | Some('r') | Some('t') => {
                chars.next();
                out.push(' ');
            }
            Some('"') | Some('\'') | Some('\\') => {
                out.push(chars.next().unwrap_or('\\'));
            }
            _ => out.push('\\'),
        }
    }
    collapse_whitespace(&out)
}

/// Replace every whitespace run with one space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Keep at most `max_chars` characters. A hard cut with no regard for words
/// or sentences.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
