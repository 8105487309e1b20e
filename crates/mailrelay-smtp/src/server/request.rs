//! Inbound command parsing.

use crate::types::{Reply, ReplyCode};

/// A command received from an SMTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// HELO with the client's domain.
    Helo(String),
    /// EHLO with the client's domain.
    Ehlo(String),
    /// MAIL FROM with the reverse path (possibly empty) and ESMTP parameters.
    Mail {
        /// Reverse path, without angle brackets.
        from: String,
        /// Parameters such as `SIZE=1024` or `BODY=8BITMIME`.
        params: Vec<String>,
    },
    /// RCPT TO with the forward path.
    Rcpt {
        /// Forward path, without angle brackets.
        to: String,
    },
    /// DATA.
    Data,
    /// RSET.
    Rset,
    /// NOOP.
    Noop,
    /// QUIT.
    Quit,
    /// AUTH with mechanism name and optional initial response.
    Auth {
        /// Mechanism name, upper-cased.
        mechanism: String,
        /// Initial response (SASL-IR).
        initial_response: Option<String>,
    },
    /// STARTTLS.
    StartTls,
    /// VRFY.
    Vrfy,
}

impl Request {
    /// Parses a command line (without the trailing CRLF).
    ///
    /// # Errors
    ///
    /// Returns the reply to send when the line is not a valid command.
    pub fn parse(line: &str) -> Result<Self, Reply> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => domain_argument(rest, "HELO").map(Self::Helo),
            "EHLO" => domain_argument(rest, "EHLO").map(Self::Ehlo),
            "MAIL" => {
                let (from, params) = path_argument(rest, "FROM:")?;
                Ok(Self::Mail { from, params })
            }
            "RCPT" => {
                let (to, _) = path_argument(rest, "TO:")?;
                if to.is_empty() {
                    return Err(syntax("5.1.3 Recipient address required"));
                }
                Ok(Self::Rcpt { to })
            }
            "DATA" => no_argument(rest, Self::Data),
            "RSET" => no_argument(rest, Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => no_argument(rest, Self::Quit),
            "STARTTLS" => no_argument(rest, Self::StartTls),
            "VRFY" => Ok(Self::Vrfy),
            "AUTH" => {
                let mut parts = rest.split_whitespace();
                let Some(mechanism) = parts.next() else {
                    return Err(syntax("5.5.4 AUTH requires a mechanism"));
                };
                Ok(Self::Auth {
                    mechanism: mechanism.to_ascii_uppercase(),
                    initial_response: parts.next().map(ToString::to_string),
                })
            }
            _ => Err(Reply::single(
                ReplyCode::SYNTAX_ERROR,
                "5.5.2 Syntax error, command unrecognized",
            )),
        }
    }

    /// Command verb, for logging. Never includes arguments.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo(_) => "HELO",
            Self::Ehlo(_) => "EHLO",
            Self::Mail { .. } => "MAIL",
            Self::Rcpt { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Auth { .. } => "AUTH",
            Self::StartTls => "STARTTLS",
            Self::Vrfy => "VRFY",
        }
    }
}

fn syntax(text: &str) -> Reply {
    Reply::single(ReplyCode::PARAMETER_ERROR, text)
}

fn domain_argument(rest: &str, verb: &str) -> Result<String, Reply> {
    rest.split_whitespace()
        .next()
        .map(ToString::to_string)
        .ok_or_else(|| syntax(&format!("5.5.4 {verb} requires a domain")))
}

fn no_argument(rest: &str, request: Request) -> Result<Request, Reply> {
    if rest.is_empty() {
        Ok(request)
    } else {
        Err(syntax("5.5.4 Unexpected argument"))
    }
}

/// Splits `FROM:<path> PARAM...` into the bare path and its parameters.
fn path_argument(rest: &str, keyword: &str) -> Result<(String, Vec<String>), Reply> {
    let prefix = rest.get(..keyword.len()).unwrap_or_default();
    if !prefix.eq_ignore_ascii_case(keyword) {
        return Err(syntax(&format!("5.5.4 Expected {keyword}<address>")));
    }
    let rest = rest[keyword.len()..].trim_start();

    let (path, params) = if let Some(inner) = rest.strip_prefix('<') {
        let Some(end) = inner.find('>') else {
            return Err(syntax("5.5.4 Unterminated address"));
        };
        (&inner[..end], &inner[end + 1..])
    } else {
        rest.split_once(char::is_whitespace).unwrap_or((rest, ""))
    };

    let params = params.split_whitespace().map(ToString::to_string).collect();
    Ok((path.trim().to_string(), params))
}

/// Returns the value of `SIZE=` from MAIL parameters, if present and numeric.
#[must_use]
pub fn declared_size(params: &[String]) -> Option<usize> {
    params.iter().find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE")
            .then(|| value.parse().ok())
            .flatten()
    })
}
