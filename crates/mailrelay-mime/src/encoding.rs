//! Transfer encodings and RFC 2047 header words.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 encoded-words in both
//! directions.

use crate::charset::Charset;
use crate::error::{Error, Result};
use crate::extract::Decoded;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

/// Longest encoded-word allowed by RFC 2047.
const MAX_ENCODED_WORD: usize = 75;

/// Prefix and suffix overhead of a `=?UTF-8?B?...?=` word.
const UTF8_B_OVERHEAD: usize = "=?UTF-8?B?".len() + "?=".len();

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring embedded whitespace and missing padding.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if cleaned.len() % 4 == 0 {
        STANDARD.decode(&cleaned).map_err(Into::into)
    } else {
        STANDARD_NO_PAD.decode(&cleaned).map_err(Into::into)
    }
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks (`=` at end of line) are removed. Any other `=` must
/// be followed by two hex digits.
///
/// # Errors
///
/// Returns an error if the input contains an invalid escape sequence.
pub fn decode_quoted_printable(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, tolerating trailing whitespace before the newline.
        let mut j = i + 1;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if data.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }
        if data.get(j) == Some(&b'\r') && data.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if j == data.len() {
            break;
        }

        let hex = data
            .get(i + 1..i + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let value = std::str::from_utf8(hex)
            .ok()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| {
                Error::InvalidEncoding(format!(
                    "Invalid hex escape: ={}",
                    String::from_utf8_lossy(hex)
                ))
            })?;
        result.push(value);
        i += 3;
    }

    Ok(result)
}

/// Encodes a header value as RFC 2047 `B` encoded-words when it is not
/// plain ASCII.
///
/// Long values are split into several words at character boundaries, each
/// at most 75 characters, separated by folding whitespace.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if text.is_ascii() && !text.contains("=?") {
        return text.to_string();
    }

    // Base64 expands 3 bytes into 4 characters.
    let max_bytes = (MAX_ENCODED_WORD - UTF8_B_OVERHEAD) / 4 * 3;
    let mut words = Vec::new();
    let mut chunk = String::new();

    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > max_bytes {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }

    words.join("\r\n ")
}

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", encode_base64(chunk.as_bytes()))
}

/// Decodes RFC 2047 encoded-words in a header value.
///
/// Text outside encoded-words is kept; whitespace between two adjacent
/// encoded-words is dropped. If any word names an unsupported charset or
/// fails to decode, the raw value is returned unchanged and marked
/// degraded.
#[must_use]
pub fn decode_rfc2047(value: &str) -> Decoded {
    match try_decode_rfc2047(value) {
        Ok(text) => Decoded::clean(text),
        Err(_) => Decoded::degraded(value.to_string()),
    }
}

fn try_decode_rfc2047(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut pending_space = "";
    let mut last_was_word = false;

    while !rest.is_empty() {
        let Some(start) = rest.find("=?") else {
            out.push_str(pending_space);
            out.push_str(rest);
            return Ok(out);
        };

        let (before, candidate) = rest.split_at(start);
        let Some((word, len)) = parse_encoded_word(candidate) else {
            // Not an encoded-word; keep `=?` literally and move on.
            out.push_str(pending_space);
            out.push_str(before);
            out.push_str("=?");
            pending_space = "";
            last_was_word = false;
            rest = &candidate[2..];
            continue;
        };

        let decoded = word.decode()?;
        // Whitespace between adjacent encoded-words is not displayed.
        if !(last_was_word && before.trim().is_empty()) {
            out.push_str(pending_space);
            out.push_str(before);
        }
        out.push_str(&decoded);
        last_was_word = true;
        rest = &candidate[len..];

        // Defer trailing whitespace until we know what follows it.
        let trimmed = rest.trim_start();
        pending_space = &rest[..rest.len() - trimmed.len()];
        rest = trimmed;
    }

    Ok(out)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
}

impl EncodedWord<'_> {
    fn decode(&self) -> Result<String> {
        let bytes = match self.encoding {
            "B" | "b" => decode_base64(self.text.as_bytes())?,
            "Q" | "q" => decode_quoted_printable(self.text.replace('_', " ").as_bytes())?,
            other => {
                return Err(Error::InvalidEncoding(format!(
                    "Unknown encoded-word encoding: {other}"
                )));
            }
        };
        Charset::from_label(self.charset).decode(&bytes)
    }
}

/// Parses `=?charset?enc?text?=` at the start of `s`, returning the word and
/// its length in bytes.
fn parse_encoded_word(s: &str) -> Option<(EncodedWord<'_>, usize)> {
    let body = s.strip_prefix("=?")?;
    let (charset, after) = body.split_once('?')?;
    let (encoding, after) = after.split_once('?')?;
    let end = after.find("?=")?;
    let text = &after[..end];

    if charset.is_empty() || encoding.len() != 1 || text.contains(char::is_whitespace) {
        return None;
    }

    let len = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((
        EncodedWord {
            charset,
            encoding,
            text,
        },
        len,
    ))
}
