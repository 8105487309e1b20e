//! Charset conversion to UTF-8.

use crate::error::{Error, Result};
use crate::extract::Decoded;
use encoding_rs::GB18030;

/// Charsets the extractor knows how to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8 and its ASCII subset.
    Utf8,
    /// The simplified Chinese family (GB2312, GBK, GB18030), decoded
    /// through the GB18030 code page which is a superset of the others.
    Gb18030,
    /// Anything else, with the lower-cased label.
    Other(String),
}

impl Charset {
    /// Maps a charset label (case-insensitive, optionally quoted) to a charset.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().trim_matches('"').to_ascii_lowercase();
        // RFC 2231 allows a language suffix: `utf-8*en`.
        let label = label.split('*').next().unwrap_or_default();
        match label {
            "" | "utf-8" | "utf8" | "us-ascii" | "ascii" => Self::Utf8,
            "gb2312" | "gbk" | "gb18030" | "x-gbk" | "cp936" => Self::Gb18030,
            other => Self::Other(other.to_string()),
        }
    }

    /// Decodes `bytes` strictly.
    ///
    /// A GB-labelled payload that is valid multi-byte UTF-8 is taken as
    /// UTF-8; senders routinely mislabel UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are invalid for the charset or the
    /// charset is not supported.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(ToString::to_string)
                .map_err(|_| Error::Charset("UTF-8".to_string())),
            Self::Gb18030 => {
                if !bytes.is_ascii() {
                    if let Ok(text) = std::str::from_utf8(bytes) {
                        return Ok(text.to_string());
                    }
                }
                GB18030
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(std::borrow::Cow::into_owned)
                    .ok_or_else(|| Error::Charset("GB18030".to_string()))
            }
            Self::Other(label) => Err(Error::UnsupportedCharset(label.clone())),
        }
    }

    /// Decodes `bytes`, falling back to lossy UTF-8.
    ///
    /// Unknown charsets are read as UTF-8; the result is degraded only if
    /// bytes had to be replaced.
    #[must_use]
    pub fn decode_lossy(&self, bytes: &[u8]) -> Decoded {
        let strict = match self {
            Self::Other(_) => Self::Utf8.decode(bytes),
            known => known.decode(bytes),
        };
        match strict {
            Ok(text) => Decoded::clean(text),
            Err(_) => Decoded::degraded(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}
