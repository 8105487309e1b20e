//! Human-readable content extraction.
//!
//! Every function here is total: malformed input yields best-effort text
//! with [`Decoded::degraded`] set instead of an error.

use crate::encoding::decode_rfc2047;
use crate::message::Part;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Deepest multipart nesting that is searched for a text leaf.
pub const MAX_MULTIPART_DEPTH: usize = 16;

static HTML_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

/// Decoded text and whether any step had to fall back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Extracted text.
    pub text: String,
    /// True if a charset, encoding, or structure problem forced a fallback.
    pub degraded: bool,
}

impl Decoded {
    /// Text that decoded without trouble.
    #[must_use]
    pub const fn clean(text: String) -> Self {
        Self {
            text,
            degraded: false,
        }
    }

    /// Best-effort text produced by a fallback path.
    #[must_use]
    pub const fn degraded(text: String) -> Self {
        Self {
            text,
            degraded: true,
        }
    }
}

/// Subject and body of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Decoded `Subject` header.
    pub subject: Decoded,
    /// Best text rendition of the body.
    pub body: Decoded,
}

/// Extracts subject and body from a raw RFC 5322 message.
#[must_use]
pub fn extract(raw: &[u8]) -> Extracted {
    let message = Part::parse(raw);
    Extracted {
        subject: subject_of(&message),
        body: body_of(&message),
    }
}

/// Extracts the decoded `Subject` header; empty if there is none.
#[must_use]
pub fn extract_subject(raw: &[u8]) -> Decoded {
    subject_of(&Part::parse(raw))
}

/// Extracts the body text.
///
/// Multipart messages yield the first `text/plain` leaf in depth-first
/// document order; failing that, the first `text/html` leaf with tags
/// stripped.
#[must_use]
pub fn extract_body(raw: &[u8]) -> Decoded {
    body_of(&Part::parse(raw))
}

fn subject_of(message: &Part<'_>) -> Decoded {
    message
        .headers
        .get("subject")
        .map(decode_rfc2047)
        .unwrap_or_default()
}

fn body_of(message: &Part<'_>) -> Decoded {
    if message.body.is_empty() {
        return Decoded::default();
    }

    let content_type = match message.content_type() {
        Ok(ct) => ct,
        Err(_) => {
            let mut decoded = message.decode_text();
            decoded.degraded = true;
            return decoded;
        }
    };

    if !content_type.is_multipart() {
        return message.decode_text();
    }

    let Some(children) = content_type
        .boundary()
        .and_then(|boundary| message.children(boundary).ok())
    else {
        // No usable boundary: hand back the raw body rather than nothing.
        return Decoded::degraded(String::from_utf8_lossy(message.body).into_owned());
    };

    if let Some(plain) = find_leaf(&children, "plain", 1) {
        return plain;
    }
    if let Some(html) = find_leaf(&children, "html", 1) {
        return Decoded {
            text: strip_html(&html.text),
            degraded: html.degraded,
        };
    }
    Decoded::default()
}

/// Depth-first, document-order search for the first `text/<sub_type>` leaf.
fn find_leaf(parts: &[Part<'_>], sub_type: &str, depth: usize) -> Option<Decoded> {
    for part in parts {
        let Ok(content_type) = part.content_type() else {
            continue;
        };

        if content_type.is_text(sub_type) {
            return Some(part.decode_text());
        }

        if content_type.is_multipart() && depth < MAX_MULTIPART_DEPTH {
            let found = content_type
                .boundary()
                .and_then(|boundary| part.children(boundary).ok())
                .and_then(|children| find_leaf(&children, sub_type, depth + 1));
            if found.is_some() {
                return found;
            }
        }
    }
    None
}

/// Removes tags, unescapes the common entities, and trims.
///
/// `&amp;` is unescaped first, so `&amp;nbsp;` becomes a space.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let stripped = HTML_TAG
        .as_ref()
        .map_or(Cow::Borrowed(html), |re| re.replace_all(html, ""));

    stripped
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .trim()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_plain_and_folded() {
        assert_eq!(
            extract_subject(b"From: a@b.c\r\nsubject: Hello\r\n\r\nbody").text,
            "Hello"
        );
        assert_eq!(
            extract_subject(b"Subject: Quarterly\r\n  report\r\n\r\n").text,
            "Quarterlyreport"
        );
        assert_eq!(extract_subject(b"From: a@b.c\r\n\r\nbody"), Decoded::default());
    }

    #[test]
    fn test_subject_gb2312_encoded_word() {
        let raw = b"Subject: =?gb2312?B?5Lit5paH?=\r\n\r\nbody";
        let subject = extract_subject(raw);
        assert_eq!(subject.text, "中文");
        assert!(!subject.degraded);
    }

    #[test]
    fn test_subject_unknown_charset_kept_raw() {
        let raw = b"Subject: =?x-unknown?Q?abc?=\r\n\r\n";
        let subject = extract_subject(raw);
        assert_eq!(subject.text, "=?x-unknown?Q?abc?=");
        assert!(subject.degraded);
    }

    #[test]
    fn test_headers_only_message() {
        let raw = b"Subject: no body\r\nFrom: a@b.c";
        let extracted = extract(raw);
        assert_eq!(extracted.subject.text, "no body");
        assert_eq!(extracted.body, Decoded::default());
    }

    #[test]
    fn test_single_part_quoted_printable() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\nCaf=C3=A9 au lait=\r\n, please";
        let body = extract_body(raw);
        assert_eq!(body.text, "Café au lait, please");
        assert!(!body.degraded);
    }

    #[test]
    fn test_single_part_without_content_type() {
        assert_eq!(extract_body(b"Subject: x\r\n\r\nplain body").text, "plain body");
    }

    #[test]
    fn test_multipart_prefers_plain_in_nested_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html first</p>\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative;\r\n",
            " boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "bmVzdGVkIHBsYWlu\r\n",
            "--inner--\r\n",
            "--outer--\r\n"
        );
        let body = extract_body(raw.as_bytes());
        assert_eq!(body.text, "nested plain");
        assert!(!body.degraded);
    }

    #[test]
    fn test_multipart_html_fallback_unescapes_entities() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=b\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<div>Hello&amp;nbsp;<b>world</b> &lt;3 &quot;x&quot;</div>\r\n",
            "--b--\r\n"
        );
        assert_eq!(
            extract_body(raw.as_bytes()).text,
            "Hello world <3 \"x\""
        );
    }

    #[test]
    fn test_multipart_html_found_in_nested_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=a\r\n",
            "\r\n",
            "--a\r\n",
            "Content-Type: multipart/related; boundary=b\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>deep</p>\r\n",
            "--b--\r\n",
            "--a\r\n",
            "Content-Type: image/png\r\n",
            "\r\n",
            "xxxx\r\n",
            "--a--\r\n"
        );
        assert_eq!(extract_body(raw.as_bytes()).text, "deep");
    }

    #[test]
    fn test_multipart_without_text_is_empty() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=a\r\n",
            "\r\n",
            "--a\r\n",
            "Content-Type: application/pdf\r\n",
            "\r\n",
            "%PDF\r\n",
            "--a--\r\n"
        );
        assert_eq!(extract_body(raw.as_bytes()), Decoded::default());
    }

    #[test]
    fn test_multipart_missing_boundary_is_degraded() {
        let raw = b"Content-Type: multipart/mixed; boundary=nope\r\n\r\njust text";
        let body = extract_body(raw);
        assert_eq!(body.text, "just text");
        assert!(body.degraded);
    }

    #[test]
    fn test_gbk_body() {
        let mut raw = b"Content-Type: text/plain; charset=GBK\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xD6, 0xD0, 0xCE, 0xC4]);
        assert_eq!(extract_body(&raw).text, "中文");
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let mut raw = String::from("Content-Type: multipart/mixed; boundary=b0\r\n\r\n");
        for depth in 1..=20 {
            raw.push_str(&format!(
                "--b{}\r\nContent-Type: multipart/mixed; boundary=b{depth}\r\n\r\n",
                depth - 1
            ));
        }
        raw.push_str("--b20\r\nContent-Type: text/plain\r\n\r\ntoo deep\r\n");
        assert_eq!(extract_body(raw.as_bytes()), Decoded::default());
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("  <p>a &amp; b</p>\n"), "a & b");
        assert_eq!(strip_html("&amp;lt;tag&amp;gt;"), "<tag>");
    }
}
