//! Type-state SMTP client used for outbound forwarding.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::debug;

/// Most lines accepted in one multi-line reply.
const MAX_REPLY_LINES: usize = 256;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// States from which a mail transaction may begin.
pub trait Ready {}

impl Ready for Connected {}
impl Ready for Authenticated {}

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

/// Result of attempting a STARTTLS upgrade.
#[derive(Debug)]
pub enum StartTlsOutcome {
    /// The session is now encrypted and capabilities were refreshed.
    Upgraded(Client<Connected>),
    /// The server did not advertise STARTTLS or refused the command; the
    /// cleartext session is still usable.
    Declined(Client<Connected>, Option<Error>),
    /// The handshake failed after the server agreed; the connection is gone.
    Broken(Error),
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        if !greeting.is_success() {
            return Err(Error::smtp_error(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            _state: PhantomData,
        })
    }

    /// Greets the server with EHLO, falling back to HELO when EHLO is refused.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings fail.
    pub async fn hello(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }

        debug!(code = %reply.code, "EHLO refused, falling back to HELO");
        let reply = self
            .send_command(Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        ensure_success(&reply)?;

        self.server_info.extensions = HashSet::new();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then greets again.
    ///
    /// The certificate is verified against `tls_hostname`.
    pub async fn starttls(mut self, tls_hostname: &str, client_hostname: &str) -> StartTlsOutcome {
        if !self.server_info.supports_starttls() {
            return StartTlsOutcome::Declined(self, None);
        }

        let reply = match self.send_command(Command::StartTls).await {
            Ok(reply) => reply,
            Err(e) => return StartTlsOutcome::Broken(e),
        };
        if !reply.is_success() {
            let err = Error::smtp_error(reply.code.as_u16(), reply.message_text());
            return StartTlsOutcome::Declined(self, Some(err));
        }

        let Self {
            stream,
            server_info,
            ..
        } = self;
        let stream = match stream.upgrade_to_tls(tls_hostname).await {
            Ok(stream) => stream,
            Err(e) => return StartTlsOutcome::Broken(e),
        };

        let client = Self {
            stream,
            server_info,
            _state: PhantomData,
        };
        match client.hello(client_hostname).await {
            Ok(client) => StartTlsOutcome::Upgraded(client),
            Err(e) => StartTlsOutcome::Broken(e),
        }
    }

    /// Authenticates using the PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());

        let reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some(encoded),
            })
            .await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }
}

impl<S: Ready> Client<S> {
    /// Starts a mail transaction.
    ///
    /// Requests `BODY=8BITMIME` when the server advertises it.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(mut self, from: Address) -> Result<Client<MailTransaction>> {
        let body = self
            .server_info
            .supports(&Extension::EightBitMime)
            .then(|| "8BITMIME".to_string());
        let reply = self.send_command(Command::MailFrom { from, body }).await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        ensure_success(&reply)?;

        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command is not answered with 354.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed and the terminating `.` line is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or the server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        self.stream.write_all(&encode_data(message)).await?;

        let reply = read_reply(&mut self.stream).await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }
}

impl<S> Client<S> {
    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        debug!(command = cmd.name(), "SMTP client command");
        self.stream.write_all(&cmd.serialize()).await?;
        read_reply(&mut self.stream).await
    }

    /// Returns true if the session is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(())
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
        if lines.len() >= MAX_REPLY_LINES {
            return Err(Error::Protocol("Reply has too many lines".into()));
        }
    }

    parse_reply(&lines)
}

fn ensure_success(reply: &Reply) -> Result<()> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    // First line is the server's greeting, not an extension.
    reply
        .message
        .iter()
        .skip(1)
        .map(|line| Extension::parse(line))
        .collect()
}

/// Converts a message into DATA wire form including the terminator.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 64);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::connection::connect;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_data_normalizes_and_stuffs() {
        assert_eq!(
            encode_data(b"Subject: x\n\n.hidden\r\nend"),
            b"Subject: x\r\n\r\n..hidden\r\nend\r\n.\r\n"
        );
        assert_eq!(encode_data(b"line\r\n"), b"line\r\n.\r\n");
        assert_eq!(encode_data(b""), b".\r\n");
    }

    /// Scripted peer: answers each received line with the next canned reply.
    async fn scripted_server(replies: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            let mut seen = Vec::new();
            let mut replies = replies.into_iter();

            write
                .write_all(replies.next().unwrap().as_bytes())
                .await
                .unwrap();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                seen.push(line.clone());
                if in_data && line != "." {
                    continue;
                }
                in_data = line == "DATA";
                let Some(reply) = replies.next() else { break };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });

        (port, handle)
    }

    #[tokio::test]
    async fn test_full_transaction_with_helo_fallback() {
        let (port, server) = scripted_server(vec![
            "220 mx.test ESMTP\r\n",
            "502 EHLO not supported\r\n",
            "250 mx.test\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "354 go ahead\r\n",
            "250 queued\r\n",
            "221 bye\r\n",
        ])
        .await;

        let stream = connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        let client = Client::from_stream(stream).await.unwrap();
        assert_eq!(client.server_info().hostname, "mx.test");

        let client = client.hello("relay.local").await.unwrap();
        assert!(client.server_info().extensions.is_empty());

        let client = client
            .mail_from(Address::new("a@relay.local").unwrap())
            .await
            .unwrap()
            .rcpt_to(Address::new("b@mx.test").unwrap())
            .await
            .unwrap()
            .data()
            .await
            .unwrap()
            .send_message(b"Subject: hi\r\n\r\n.dot\r\n")
            .await
            .unwrap();
        client.quit().await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "EHLO relay.local",
                "HELO relay.local",
                "MAIL FROM:<a@relay.local>",
                "RCPT TO:<b@mx.test>",
                "DATA",
                "Subject: hi",
                "",
                "..dot",
                ".",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_starttls_declined_when_not_advertised() {
        let (port, server) = scripted_server(vec![
            "220 mx.test\r\n",
            "250-mx.test\r\n250-8BITMIME\r\n250 SIZE 1000\r\n",
            "250 OK\r\n",
            "221 bye\r\n",
        ])
        .await;

        let stream = connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        let client = Client::from_stream(stream)
            .await
            .unwrap()
            .hello("relay.local")
            .await
            .unwrap();
        assert_eq!(client.server_info().max_message_size(), Some(1000));

        let StartTlsOutcome::Declined(client, None) =
            client.starttls("mx.test", "relay.local").await
        else {
            panic!("expected a declined upgrade");
        };
        assert!(!client.is_tls());

        let client = client
            .mail_from(Address::new("a@relay.local").unwrap())
            .await
            .unwrap();
        client.quit().await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(seen[1], "MAIL FROM:<a@relay.local> BODY=8BITMIME");
    }

    #[tokio::test]
    async fn test_rejected_recipient_is_smtp_error() {
        let (port, _server) = scripted_server(vec![
            "220 mx.test\r\n",
            "250 mx.test\r\n",
            "250 OK\r\n",
            "550 5.1.1 no such user\r\n",
        ])
        .await;

        let stream = connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        let result = Client::from_stream(stream)
            .await
            .unwrap()
            .hello("relay.local")
            .await
            .unwrap()
            .mail_from(Address::new("a@relay.local").unwrap())
            .await
            .unwrap()
            .rcpt_to(Address::new("nobody@mx.test").unwrap())
            .await;

        match result {
            Err(Error::SmtpError { code, message }) => {
                assert_eq!(code, 550);
                assert!(message.contains("no such user"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
