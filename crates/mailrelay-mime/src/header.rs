//! MIME header handling.

/// Collection of message headers in their original order.
///
/// Names compare case-insensitively. Folded values are unfolded by
/// trimming each continuation line and appending it with no separator.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses a header block.
    ///
    /// Parsing stops at the first empty line. Lines that are neither a
    /// `Name: value` field nor a continuation are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        headers
    }

    /// Parses a header block from raw bytes, replacing invalid UTF-8.
    #[must_use]
    pub fn parse_bytes(raw: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "X-Not-A-Header: body text\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("to"), Some("recipient@example.com"));
        assert_eq!(headers.get("SUBJECT"), Some("Test Message"));
        assert_eq!(headers.get("Content-Type"), Some("text/plain;charset=utf-8"));
        assert_eq!(headers.get("X-Not-A-Header"), None);
    }

    #[test]
    fn test_folding_concatenates_without_separator() {
        let headers = Headers::parse("Subject: =?utf-8?B?SMOp?=\r\n\t=?utf-8?B?bGxv?=\r\n");
        assert_eq!(headers.get("Subject"), Some("=?utf-8?B?SMOp?==?utf-8?B?bGxv?="));
    }

    #[test]
    fn test_repeated_fields_keep_order() {
        let headers = Headers::parse("Received: a\nReceived: b\nSubject: x\n");
        assert_eq!(headers.get_all("received"), vec!["a", "b"]);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Received", "Received", "Subject"]);
    }

    #[test]
    fn test_garbage_lines_skipped() {
        let headers = Headers::parse_bytes(b"garbage\r\n continuation\r\nSubject: ok\r\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subject"), Some("ok"));
    }
}
