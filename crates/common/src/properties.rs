//! Java-style `.properties` loading.
//!
//! Kafka client settings are conventionally written as `.properties` files,
//! so the probe reads its whole configuration that way and hands the flat
//! key/value map to the typed `Config::from_vars` validators.
//!
//! Supported syntax:
//!
//! - `key=value`, `key: value` and `key value` entries
//! - `#` and `!` comment lines, blank lines
//! - line continuation with a trailing backslash
//! - escapes `\t`, `\n`, `\r`, `\f`, `\uXXXX` and `\<any>` for a literal char
//!
//! Later duplicates replace earlier ones.

use std::collections::HashMap;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use thiserror::Error;

/// Errors produced while loading a properties file.
#[derive(Debug, Error)]
pub enum PropertiesError {
    #[error("failed to read properties file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid \\u escape on line {line}")]
    InvalidUnicodeEscape { line: usize },
}

/// Read and parse a properties file.
///
/// # Errors
///
/// Returns [`PropertiesError::Io`] if the file cannot be read and
/// [`PropertiesError::InvalidUnicodeEscape`] for malformed `\u` escapes.
pub fn load(path: impl AsRef<Path>) -> Result<HashMap<String, String>, PropertiesError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| PropertiesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

/// Parse properties text into a key/value map.
///
/// # Errors
///
/// Returns [`PropertiesError::InvalidUnicodeEscape`] for malformed `\u` escapes.
pub fn parse(text: &str) -> Result<HashMap<String, String>, PropertiesError> {
    let mut entries = HashMap::new();

    for (line, logical) in logical_lines(text) {
        let (key, value) = parse_entry(&logical, line)?;
        entries.insert(key, value);
    }

    Ok(entries)
}

/// Join continuation lines and drop comments/blank lines.
///
/// Yields the 1-based number of the first natural line of each entry.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, natural) in text.lines().enumerate() {
        let trimmed = natural.trim_start_matches(is_blank);

        let (start, mut buf) = match pending.take() {
            Some(open) => open,
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                (idx + 1, String::new())
            }
        };

        if ends_with_continuation(trimmed) {
            buf.push_str(trimmed.strip_suffix('\\').unwrap_or(trimmed));
            pending = Some((start, buf));
        } else {
            buf.push_str(trimmed);
            out.push((start, buf));
        }
    }

    // A continuation on the very last line just ends the entry.
    if let Some(open) = pending {
        out.push(open);
    }

    out
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{c}')
}

fn parse_entry(line: &str, line_no: usize) -> Result<(String, String), PropertiesError> {
    let mut chars = line.chars().peekable();
    let mut key = String::new();
    let mut separator_seen = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(unescaped) = unescape(&mut chars, line_no)? {
                    key.push(unescaped);
                }
            }
            '=' | ':' => {
                separator_seen = true;
                break;
            }
            c if is_blank(c) => break,
            c => key.push(c),
        }
    }

    skip_blanks(&mut chars);
    if !separator_seen && matches!(chars.peek(), Some('=' | ':')) {
        chars.next();
        skip_blanks(&mut chars);
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(unescaped) = unescape(&mut chars, line_no)? {
                value.push(unescaped);
            }
        } else {
            value.push(c);
        }
    }

    Ok((key, value))
}

fn skip_blanks(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| is_blank(*c)) {
        chars.next();
    }
}

fn unescape(
    chars: &mut Peekable<Chars<'_>>,
    line_no: usize,
) -> Result<Option<char>, PropertiesError> {
    let Some(c) = chars.next() else {
        return Ok(None);
    };

    let unescaped = match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\u{c}',
        'u' => {
            let hex: String = chars.by_ref().take(4).collect();
            if hex.len() != 4 {
                return Err(PropertiesError::InvalidUnicodeEscape { line: line_no });
            }
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or(PropertiesError::InvalidUnicodeEscape { line: line_no })?
        }
        other => other,
    };

    Ok(Some(unescaped))
}
