//! The line-oriented `key=value` text format used by preference files and
//! export streams.
//!
//! Reading accepts the full escape syntax: `#`/`!` comment lines, `=`, `:` or
//! whitespace separators, backslash line continuations and `\uXXXX` escapes.
//! Writing is canonical: entries sorted by key, `=` separators, no comments
//! and no timestamp, every character outside printable ASCII escaped.

use std::collections::BTreeMap;
use std::fmt;

/// A malformed escape sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Decode raw stream bytes.
///
/// Files written by this crate are pure ASCII. Anything that is not valid
/// UTF-8 is read byte-per-character, as Latin-1.
pub fn decode_bytes(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => data.iter().map(|&b| b as char).collect(),
    }
}

/// Parse properties text into a sorted map. Later duplicates win.
pub fn parse(text: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let mut entries = BTreeMap::new();
    let mut lines = natural_lines(text).into_iter().peekable();

    while let Some((number, first)) = lines.next() {
        let trimmed = first.trim_start_matches(is_blank);
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = String::new();
        let mut current = trimmed.to_string();
        loop {
            if ends_with_continuation(&current) {
                current.pop();
                logical.push_str(&current);
                match lines.next() {
                    Some((_, next)) => current = next.trim_start_matches(is_blank).to_string(),
                    None => {
                        current = String::new();
                        break;
                    }
                }
            } else {
                break;
            }
        }
        logical.push_str(&current);

        let (raw_key, raw_value) = split_entry(&logical);
        let key = unescape(raw_key, number)?;
        let value = unescape(raw_value, number)?;
        entries.insert(key, value);
    }

    Ok(entries)
}

/// Render entries one per line, sorted, using `line_separator`.
pub fn store(entries: &BTreeMap<String, String>, line_separator: &str) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push_str(line_separator);
    }
    out
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\x0c'
}

/// Split on `\n`, `\r` or `\r\n`, numbering lines from 1.
fn natural_lines(text: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .collect()
}

/// A line continues when it ends in an odd number of backslashes.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Split a logical line into raw (still escaped) key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                let rest = line[i + 1..].trim_start_matches(is_blank);
                return (&line[..key_end], rest);
            }
            c if is_blank(c) => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    if key_end == line.len() {
        return (line, "");
    }
    let rest = line[key_end..].trim_start_matches(is_blank);
    let rest = match rest.strip_prefix(['=', ':']) {
        Some(after) => after.trim_start_matches(is_blank),
        None => rest,
    };
    (&line[..key_end], rest)
}

fn unescape(raw: &str, line: usize) -> Result<String, ParseError> {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut buf = [0u16; 2];

    while let Some(c) = chars.next() {
        if c != '\\' {
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let escaped = match chars.next() {
            Some(e) => e,
            None => break,
        };
        match escaped {
            't' => units.push(u16::from(b'\t')),
            'n' => units.push(u16::from(b'\n')),
            'r' => units.push(u16::from(b'\r')),
            'f' => units.push(0x0c),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let unit = if hex.len() == 4 {
                    u16::from_str_radix(&hex, 16).ok()
                } else {
                    None
                };
                match unit {
                    Some(unit) => units.push(unit),
                    None => {
                        return Err(ParseError {
                            line,
                            message: format!("malformed \\uXXXX escape '\\u{}'", hex),
                        })
                    }
                }
            }
            other => units.extend_from_slice(other.encode_utf16(&mut buf)),
        }
    }

    String::from_utf16(&units).map_err(|_| ParseError {
        line,
        message: "unpaired surrogate in \\uXXXX escape".to_string(),
    })
}

fn escape(text: &str, escape_space: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.chars().enumerate() {
        match c {
            ' ' if i == 0 || escape_space => out.push_str("\\ "),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '\\' | '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
        }
    }
    out
}
