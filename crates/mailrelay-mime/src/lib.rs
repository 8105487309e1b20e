//! # mailrelay-mime
//!
//! MIME parsing for the mailrelay forwarder. The forwarder never rewrites
//! the messages it receives; it only needs a readable subject and body to
//! put into the forwarded notice.
//!
//! ## Extraction
//!
//! ```ignore
//! use mailrelay_mime::extract;
//!
//! let raw = b"Subject: =?UTF-8?B?SMOpbGxv?=\r\n\
//!             Content-Type: text/plain; charset=utf-8\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let extracted = extract(raw);
//! assert_eq!(extracted.subject.text, "Héllo");
//! assert_eq!(extracted.body.text, "Hello, World!");
//! ```
//!
//! Extraction never fails. When a charset, transfer encoding, or multipart
//! structure is broken the best-effort text is returned and
//! [`Decoded::degraded`] is set so the caller can log it.
//!
//! ## Encoding
//!
//! ```ignore
//! use mailrelay_mime::encoding::{decode_rfc2047, encode_rfc2047};
//!
//! let header = encode_rfc2047("中文主题");
//! assert_eq!(decode_rfc2047(&header).text, "中文主题");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod charset;
mod content_type;
mod error;
mod extract;
mod header;
mod message;

pub mod encoding;

pub use charset::Charset;
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use extract::{
    Decoded, Extracted, MAX_MULTIPART_DEPTH, extract, extract_body, extract_subject, strip_html,
};
pub use header::Headers;
pub use message::{Part, TransferEncoding, split_multipart};
