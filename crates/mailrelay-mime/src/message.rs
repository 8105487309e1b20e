//! MIME entities: header/body split, multipart splitting, body decoding.

use crate::charset::Charset;
use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::extract::Decoded;
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit text.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from a header value. Unknown values are
    /// treated as identity encodings.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Reverses the encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid for the encoding.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(body),
            Self::QuotedPrintable => decode_quoted_printable(body),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// A message or body part: parsed headers plus the raw body bytes.
#[derive(Debug, Clone)]
pub struct Part<'a> {
    /// Part headers.
    pub headers: Headers,
    /// Undecoded body.
    pub body: &'a [u8],
}

impl<'a> Part<'a> {
    /// Splits an entity into headers and body at the first blank line.
    ///
    /// Without a blank line the whole input is headers and the body is
    /// empty. An entity that starts with a blank line has no headers.
    #[must_use]
    pub fn parse(raw: &'a [u8]) -> Self {
        let (head, body) = split_head_body(raw);
        Self {
            headers: Headers::parse_bytes(head),
            body,
        }
    }

    /// Returns the content type, defaulting to `text/plain` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is present but malformed.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::new("text", "plain")), ContentType::parse)
    }

    /// Returns the transfer encoding, defaulting to 7bit.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body to text: transfer encoding first, then charset.
    ///
    /// Never fails. An invalid transfer payload is used raw, invalid
    /// charset bytes are replaced, and either marks the result degraded.
    #[must_use]
    pub fn decode_text(&self) -> Decoded {
        let (bytes, transfer_failed) = match self.transfer_encoding().decode(self.body) {
            Ok(bytes) => (bytes, false),
            Err(_) => (self.body.to_vec(), true),
        };

        let charset = self
            .content_type()
            .ok()
            .and_then(|ct| ct.charset().map(Charset::from_label))
            .unwrap_or(Charset::Utf8);

        let mut decoded = charset.decode_lossy(&bytes);
        decoded.degraded |= transfer_failed;
        decoded
    }

    /// Splits this part's body into its multipart children.
    ///
    /// # Errors
    ///
    /// Returns an error if the body never mentions the boundary.
    pub fn children(&self, boundary: &str) -> Result<Vec<Part<'a>>> {
        Ok(split_multipart(self.body, boundary)?
            .into_iter()
            .map(Part::parse)
            .collect())
    }
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = raw.strip_prefix(b"\r\n") {
        return (&[][..], body);
    }
    if let Some(body) = raw.strip_prefix(b"\n") {
        return (&[][..], body);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = find(raw, b"\n\n").map(|i| (i, i + 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    split.map_or((raw, &[][..]), |(end, start)| (&raw[..end], &raw[start..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Splits a multipart body into raw child entities.
///
/// The preamble before the first delimiter and the epilogue after the
/// closing delimiter are dropped. A missing closing delimiter ends the
/// last part at the end of input.
///
/// # Errors
///
/// Returns an error if no delimiter line is found.
pub fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut seen_delimiter = false;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i + 1);
        let line = trim_line(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                seen_delimiter = true;
                if let Some(start) = current.take() {
                    parts.push(strip_trailing_newline(&body[start..pos]));
                }
                if closing {
                    return Ok(parts);
                }
                current = Some(line_end);
            }
        }

        pos = line_end;
    }

    if !seen_delimiter {
        return Err(Error::InvalidMultipart(format!(
            "boundary {boundary:?} not found"
        )));
    }
    if let Some(start) = current {
        if start < body.len() {
            parts.push(&body[start..]);
        }
    }
    Ok(parts)
}

/// Removes the line break and any transport padding from a line.
fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

/// The line break before a delimiter belongs to the delimiter.
fn strip_trailing_newline(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_part_parse() {
        let part = Part::parse(b"Content-Type: text/plain\r\n\r\nHello\r\n\r\nWorld");
        assert_eq!(part.headers.get("content-type"), Some("text/plain"));
        assert_eq!(part.body, b"Hello\r\n\r\nWorld");
    }

    #[test]
    fn test_part_without_headers() {
        let part = Part::parse(b"\r\nJust a body");
        assert!(part.headers.is_empty());
        assert_eq!(part.body, b"Just a body");
        assert!(part.content_type().unwrap().is_text("plain"));
    }

    #[test]
    fn test_part_without_body() {
        let part = Part::parse(b"Subject: only headers\r\n");
        assert_eq!(part.headers.get("subject"), Some("only headers"));
        assert!(part.body.is_empty());
    }

    #[test]
    fn test_decode_text() {
        let part = Part::parse(
            b"Content-Type: text/plain; charset=gbk\r\nContent-Transfer-Encoding: base64\r\n\r\n1tDOxA==\r\n",
        );
        let decoded = part.decode_text();
        assert_eq!(decoded.text, "中文");
        assert!(!decoded.degraded);
    }

    #[test]
    fn test_decode_text_invalid_base64_is_degraded() {
        let part = Part::parse(b"Content-Transfer-Encoding: base64\r\n\r\n*** not base64 ***");
        let decoded = part.decode_text();
        assert_eq!(decoded.text, "*** not base64 ***");
        assert!(decoded.degraded);
    }

    #[test]
    fn test_split_multipart() {
        let body = concat!(
            "preamble\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first\r\n",
            "--b1  \r\n",
            "\r\n",
            "second\r\n",
            "--b1--\r\n",
            "epilogue\r\n"
        );
        let parts = split_multipart(body.as_bytes(), "b1").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"Content-Type: text/plain\r\n\r\nfirst");
        assert_eq!(parts[1], b"\r\nsecond");
    }

    #[test]
    fn test_split_multipart_unterminated() {
        let parts = split_multipart(b"--b1\r\n\r\ntail", "b1").unwrap();
        assert_eq!(parts, vec![&b"\r\ntail"[..]]);
    }

    #[test]
    fn test_split_multipart_similar_boundary_is_content() {
        let body = b"--b1\r\n\r\nline\r\n--b1x not a delimiter\r\n--b1--";
        let parts = split_multipart(body, "b1").unwrap();
        assert_eq!(parts, vec![&b"\r\nline\r\n--b1x not a delimiter"[..]]);
    }

    #[test]
    fn test_split_multipart_missing_boundary() {
        assert!(split_multipart(b"no delimiters here", "b1").is_err());
    }

    #[test]
    fn test_children() {
        let part = Part::parse(
            b"Content-Type: multipart/mixed; boundary=x\r\n\r\n--x\r\nContent-Type: text/html\r\n\r\n<b>hi</b>\r\n--x--\r\n",
        );
        let ct = part.content_type().unwrap();
        let children = part.children(ct.boundary().unwrap()).unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].content_type().unwrap().is_text("html"));
        assert_eq!(children[0].body, b"<b>hi</b>");
    }
}
