//! Inbound SMTP protocol driver.
//!
//! The driver owns the wire protocol (greeting, command sequencing, DATA
//! framing, size limits, idle timeouts) and delegates every transaction
//! decision to a [`Session`] created by a [`Backend`].

mod request;
mod session;

pub use request::{Request, declared_size};
pub use session::{Backend, Rejection, Session};

use crate::error::{Error, Result};
use crate::types::{AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Default cap on accepted message size (10 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Default idle read/write timeout per session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest command line accepted, including CRLF.
const MAX_COMMAND_LINE: usize = 4096;

/// Read granularity while receiving message data.
const DATA_CHUNK: usize = 64 * 1024;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Domain announced in the greeting and EHLO reply.
    pub domain: String,
    /// Largest message accepted by DATA, advertised via SIZE.
    pub max_message_bytes: usize,
    /// Idle timeout for every read and write.
    pub idle_timeout: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits for `domain`.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Accepts connections forever, running each one in its own task.
pub async fn serve<B: Backend>(
    listener: TcpListener,
    backend: Arc<B>,
    config: Arc<ServerConfig>,
) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept SMTP connection: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let backend = Arc::clone(&backend);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            debug!(%peer, "SMTP connection accepted");
            if let Err(e) = handle_connection(socket, Some(peer), backend.as_ref(), &config).await
            {
                debug!(%peer, "SMTP connection ended: {e}");
            }
        });
    }
}

/// Runs the protocol on one connection until QUIT, EOF, or idle timeout.
///
/// # Errors
///
/// Returns an error if the connection fails mid-session.
pub async fn handle_connection<S, B>(
    stream: S,
    peer: Option<SocketAddr>,
    backend: &B,
    config: &ServerConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    B: Backend,
{
    let session = backend.new_session(peer).await;
    let mut conn = Connection {
        reader: BufReader::new(stream),
        session,
        config,
        greeted: false,
        authenticated: false,
        has_sender: false,
        recipients: 0,
    };

    let result = conn.run().await;
    conn.session.logout();
    result
}

enum Flow {
    Continue,
    Close,
}

enum Line {
    Text(String),
    TooLong,
}

struct Connection<'a, S, T> {
    reader: BufReader<S>,
    session: T,
    config: &'a ServerConfig,
    greeted: bool,
    authenticated: bool,
    has_sender: bool,
    recipients: usize,
}

impl<S, T> Connection<'_, S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    T: Session,
{
    async fn run(&mut self) -> Result<()> {
        let greeting = format!("{} ESMTP Service Ready", self.config.domain);
        self.send(&Reply::single(ReplyCode::SERVICE_READY, greeting))
            .await?;

        loop {
            let line = match self.read_command().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(Error::Timeout(_)) => {
                    self.close_idle().await;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let flow = match line {
                Line::TooLong => {
                    self.send(&Reply::single(
                        ReplyCode::SYNTAX_ERROR,
                        "5.5.2 Line too long",
                    ))
                    .await?;
                    Flow::Continue
                }
                Line::Text(text) => match Request::parse(&text) {
                    Ok(request) => match self.handle(request).await {
                        Err(Error::Timeout(_)) => {
                            self.close_idle().await;
                            return Ok(());
                        }
                        other => other?,
                    },
                    Err(reply) => {
                        self.send(&reply).await?;
                        Flow::Continue
                    }
                },
            };

            if let Flow::Close = flow {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, request: Request) -> Result<Flow> {
        debug!(command = request.verb(), "SMTP server command");
        let reply = match request {
            Request::Helo(client) => {
                self.reset_transaction();
                self.greeted = true;
                Reply::single(
                    ReplyCode::OK,
                    format!("{} Hello {client}", self.config.domain),
                )
            }
            Request::Ehlo(client) => {
                self.reset_transaction();
                self.greeted = true;
                Reply::new(
                    ReplyCode::OK,
                    vec![
                        format!("{} Hello {client}", self.config.domain),
                        Extension::EightBitMime.to_string(),
                        Extension::Size(Some(self.config.max_message_bytes)).to_string(),
                        Extension::Auth(vec![AuthMechanism::Plain]).to_string(),
                    ],
                )
            }
            Request::Mail { from, params } => self.mail(&from, &params).await,
            Request::Rcpt { to } => self.rcpt(&to).await,
            Request::Data => self.data().await?,
            Request::Rset => {
                self.reset_transaction();
                Reply::single(ReplyCode::OK, "2.0.0 Flushed")
            }
            Request::Noop => Reply::single(ReplyCode::OK, "2.0.0 OK"),
            Request::Quit => {
                self.send(&Reply::single(ReplyCode::CLOSING, "2.0.0 Bye"))
                    .await?;
                return Ok(Flow::Close);
            }
            Request::Auth {
                mechanism,
                initial_response,
            } => match self.auth(&mechanism, initial_response).await? {
                Some(reply) => reply,
                None => return Ok(Flow::Close),
            },
            Request::StartTls => {
                Reply::single(ReplyCode::NOT_IMPLEMENTED, "5.5.1 TLS not supported")
            }
            Request::Vrfy => Reply::single(
                ReplyCode::CANNOT_VERIFY,
                "2.5.0 Cannot VRFY user, but will accept message",
            ),
        };

        self.send(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn mail(&mut self, from: &str, params: &[String]) -> Reply {
        if !self.greeted {
            return bad_sequence("5.5.1 Send HELO/EHLO first");
        }
        if self.has_sender {
            return bad_sequence("5.5.1 Sender already specified");
        }
        if declared_size(params).is_some_and(|size| size > self.config.max_message_bytes) {
            return Reply::single(
                ReplyCode::EXCEEDED_STORAGE,
                "5.3.4 Message size exceeds fixed limit",
            );
        }

        match self.session.mail(from).await {
            Ok(()) => {
                self.has_sender = true;
                Reply::single(ReplyCode::OK, "2.1.0 Sender OK")
            }
            Err(rejection) => rejection.to_reply(),
        }
    }

    async fn rcpt(&mut self, to: &str) -> Reply {
        if !self.has_sender {
            return bad_sequence("5.5.1 Need MAIL before RCPT");
        }

        match self.session.rcpt(to).await {
            Ok(()) => {
                self.recipients += 1;
                Reply::single(ReplyCode::OK, "2.1.5 Recipient OK")
            }
            Err(rejection) => rejection.to_reply(),
        }
    }

    async fn data(&mut self) -> Result<Reply> {
        if !self.has_sender || self.recipients == 0 {
            return Ok(bad_sequence("5.5.1 Need RCPT before DATA"));
        }

        self.send(&Reply::single(
            ReplyCode::START_DATA,
            "Start mail input; end with <CRLF>.<CRLF>",
        ))
        .await?;

        let message = self.read_data().await?;
        let reply = match message {
            None => Reply::single(
                ReplyCode::EXCEEDED_STORAGE,
                "5.3.4 Maximum message size exceeded",
            ),
            Some(message) => match self.session.data(message).await {
                Ok(()) => Reply::single(ReplyCode::OK, "2.0.0 OK: queued"),
                Err(rejection) => rejection.to_reply(),
            },
        };

        self.reset_transaction();
        Ok(reply)
    }

    /// Returns `None` when the client hung up mid-exchange.
    async fn auth(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
    ) -> Result<Option<Reply>> {
        if !self.greeted {
            return Ok(Some(bad_sequence("5.5.1 Send EHLO first")));
        }
        if self.authenticated {
            return Ok(Some(bad_sequence("5.5.1 Already authenticated")));
        }
        if self.has_sender {
            return Ok(Some(bad_sequence(
                "5.5.1 AUTH not allowed during a mail transaction",
            )));
        }
        if mechanism != AuthMechanism::Plain.as_str() {
            return Ok(Some(Reply::single(
                ReplyCode::PARAMETER_NOT_IMPLEMENTED,
                "5.5.4 Unsupported authentication mechanism",
            )));
        }

        let response = if let Some(response) = initial_response {
            response
        } else {
            self.send(&Reply::new(ReplyCode::AUTH_CONTINUE, Vec::new()))
                .await?;
            match self.read_command().await? {
                Some(Line::Text(text)) => text,
                Some(Line::TooLong) => {
                    return Ok(Some(Reply::single(
                        ReplyCode::SYNTAX_ERROR,
                        "5.5.2 Line too long",
                    )));
                }
                None => return Ok(None),
            }
        };

        if response.trim() == "*" {
            return Ok(Some(Reply::single(
                ReplyCode::PARAMETER_ERROR,
                "5.0.0 Authentication cancelled",
            )));
        }
        let Some((username, password)) = decode_plain(response.trim()) else {
            return Ok(Some(Reply::single(
                ReplyCode::PARAMETER_ERROR,
                "5.5.2 Invalid PLAIN credentials",
            )));
        };

        Ok(Some(
            match self.session.auth_plain(&username, &password).await {
                Ok(()) => {
                    self.authenticated = true;
                    Reply::single(ReplyCode::AUTH_SUCCEEDED, "2.7.0 Authentication successful")
                }
                Err(rejection) => rejection.to_reply(),
            },
        ))
    }

    fn reset_transaction(&mut self) {
        self.has_sender = false;
        self.recipients = 0;
        self.session.reset();
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let idle = self.config.idle_timeout;
        let data = reply.serialize();
        let stream = self.reader.get_mut();
        tokio::time::timeout(idle, async {
            stream.write_all(&data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::Timeout(idle))??;
        Ok(())
    }

    async fn close_idle(&mut self) {
        debug!("SMTP session idle, closing");
        let text = format!(
            "4.4.2 {} Idle timeout, closing connection",
            self.config.domain
        );
        // Best effort: the peer may already be gone.
        let _ = self
            .send(&Reply::single(ReplyCode::SERVICE_UNAVAILABLE, text))
            .await;
    }

    /// Reads up to `limit` bytes or through the next LF. `None` on EOF.
    async fn read_chunk(&mut self, limit: usize) -> Result<Option<Vec<u8>>> {
        let idle = self.config.idle_timeout;
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let mut buf = Vec::new();
        let n = tokio::time::timeout(
            idle,
            (&mut self.reader).take(limit).read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| Error::Timeout(idle))??;
        Ok((n > 0).then_some(buf))
    }

    async fn read_command(&mut self) -> Result<Option<Line>> {
        let Some(chunk) = self.read_chunk(MAX_COMMAND_LINE).await? else {
            return Ok(None);
        };
        if chunk.ends_with(b"\n") {
            let text = String::from_utf8_lossy(&chunk).trim_end().to_string();
            return Ok(Some(Line::Text(text)));
        }
        if chunk.len() < MAX_COMMAND_LINE {
            // Peer closed without finishing the line.
            return Ok(None);
        }

        loop {
            match self.read_chunk(MAX_COMMAND_LINE).await? {
                None => return Ok(None),
                Some(rest) if rest.ends_with(b"\n") => return Ok(Some(Line::TooLong)),
                Some(_) => {}
            }
        }
    }

    /// Reads message data through the lone `.` line.
    ///
    /// Returns `None` when the message exceeded the size cap; the data is
    /// still consumed up to the terminator so the session stays in sync.
    async fn read_data(&mut self) -> Result<Option<Vec<u8>>> {
        let max = self.config.max_message_bytes;
        let mut message = Vec::new();
        let mut too_large = false;
        let mut at_line_start = true;

        loop {
            let Some(chunk) = self.read_chunk(DATA_CHUNK).await? else {
                return Err(Error::ConnectionClosed);
            };
            let complete = chunk.ends_with(b"\n");
            let mut line = chunk.as_slice();
            if complete {
                line = line.strip_suffix(b"\n").unwrap_or(line);
                line = line.strip_suffix(b"\r").unwrap_or(line);
            }

            if at_line_start && complete && line == b"." {
                break;
            }
            if at_line_start && line.first() == Some(&b'.') {
                line = &line[1..];
            }

            if !too_large {
                let added = line.len() + if complete { 2 } else { 0 };
                if message.len() + added > max {
                    too_large = true;
                    message = Vec::new();
                } else {
                    message.extend_from_slice(line);
                    if complete {
                        message.extend_from_slice(b"\r\n");
                    }
                }
            }
            at_line_start = complete;
        }

        Ok((!too_large).then_some(message))
    }
}

fn bad_sequence(text: &str) -> Reply {
    Reply::single(ReplyCode::BAD_SEQUENCE, text)
}

/// Decodes a SASL PLAIN response (`authzid\0authcid\0passwd`).
fn decode_plain(response: &str) -> Option<(String, String)> {
    if response == "=" {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(response)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let mut parts = decoded.split('\0');
    let _authzid = parts.next()?;
    let username = parts.next()?;
    let password = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::io::Builder;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Delivered {
        from: String,
        to: Vec<String>,
        message: Vec<u8>,
    }

    #[derive(Default)]
    struct TestBackend {
        delivered: Arc<Mutex<Vec<Delivered>>>,
        logins: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl TestBackend {
        fn delivered(&self) -> Vec<Delivered> {
            self.delivered.lock().unwrap().clone()
        }
    }

    struct TestSession {
        from: Option<String>,
        to: Vec<String>,
        delivered: Arc<Mutex<Vec<Delivered>>>,
        logins: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Backend for TestBackend {
        type Session = TestSession;

        async fn new_session(&self, _peer: Option<SocketAddr>) -> TestSession {
            TestSession {
                from: None,
                to: Vec::new(),
                delivered: Arc::clone(&self.delivered),
                logins: Arc::clone(&self.logins),
            }
        }
    }

    #[async_trait]
    impl Session for TestSession {
        async fn auth_plain(
            &mut self,
            username: &str,
            password: &str,
        ) -> std::result::Result<(), Rejection> {
            self.logins
                .lock()
                .unwrap()
                .push((username.to_string(), password.to_string()));
            Ok(())
        }

        async fn mail(&mut self, from: &str) -> std::result::Result<(), Rejection> {
            self.from = Some(from.to_string());
            Ok(())
        }

        async fn rcpt(&mut self, to: &str) -> std::result::Result<(), Rejection> {
            if !to.ends_with("@relay.test") {
                return Err(Rejection::new(
                    ReplyCode::MAILBOX_UNAVAILABLE,
                    "5.7.1 Relay access denied",
                ));
            }
            self.to.push(to.to_string());
            Ok(())
        }

        async fn data(&mut self, message: Vec<u8>) -> std::result::Result<(), Rejection> {
            self.delivered.lock().unwrap().push(Delivered {
                from: self.from.clone().unwrap_or_default(),
                to: self.to.clone(),
                message,
            });
            Ok(())
        }

        fn reset(&mut self) {
            self.from = None;
            self.to.clear();
        }
    }

    fn config() -> ServerConfig {
        ServerConfig::new("relay.test")
    }

    const GREETING: &[u8] = b"220 relay.test ESMTP Service Ready\r\n";

    #[tokio::test]
    async fn test_full_transaction() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"EHLO client.example\r\n")
            .write(
                b"250-relay.test Hello client.example\r\n250-8BITMIME\r\n250-SIZE 10485760\r\n250 AUTH PLAIN\r\n",
            )
            .read(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .write(b"235 2.7.0 Authentication successful\r\n")
            .read(b"MAIL FROM:<alice@example.com> BODY=8BITMIME\r\n")
            .write(b"250 2.1.0 Sender OK\r\n")
            .read(b"RCPT TO:<stranger@elsewhere.test>\r\n")
            .write(b"550 5.7.1 Relay access denied\r\n")
            .read(b"RCPT TO:<sales@relay.test>\r\n")
            .write(b"250 2.1.5 Recipient OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
            .read(b"Subject: hi\r\n\r\n..leading dot\nbare lf\r\n.\r\n")
            .write(b"250 2.0.0 OK: queued\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 2.0.0 Bye\r\n")
            .build();

        let backend = TestBackend::default();
        handle_connection(mock, None, &backend, &config())
            .await
            .unwrap();

        assert_eq!(
            backend.delivered(),
            vec![Delivered {
                from: "alice@example.com".into(),
                to: vec!["sales@relay.test".into()],
                message: b"Subject: hi\r\n\r\n.leading dot\r\nbare lf\r\n".to_vec(),
            }]
        );
        assert_eq!(
            backend.logins.lock().unwrap().as_slice(),
            &[("user".to_string(), "pass".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sequence_errors() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"503 5.5.1 Send HELO/EHLO first\r\n")
            .read(b"HELO client\r\n")
            .write(b"250 relay.test Hello client\r\n")
            .read(b"RCPT TO:<sales@relay.test>\r\n")
            .write(b"503 5.5.1 Need MAIL before RCPT\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"250 2.1.0 Sender OK\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"503 5.5.1 Sender already specified\r\n")
            .read(b"DATA\r\n")
            .write(b"503 5.5.1 Need RCPT before DATA\r\n")
            .read(b"STARTTLS\r\n")
            .write(b"502 5.5.1 TLS not supported\r\n")
            .read(b"VRFY someone\r\n")
            .write(b"252 2.5.0 Cannot VRFY user, but will accept message\r\n")
            .read(b"FROB\r\n")
            .write(b"500 5.5.2 Syntax error, command unrecognized\r\n")
            .read(b"RSET\r\n")
            .write(b"250 2.0.0 Flushed\r\n")
            .read(b"NOOP\r\n")
            .write(b"250 2.0.0 OK\r\n")
            .build();

        let backend = TestBackend::default();
        handle_connection(mock, None, &backend, &config())
            .await
            .unwrap();
        assert!(backend.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_message_is_refused() {
        let mut config = config();
        config.max_message_bytes = 16;

        let mock = Builder::new()
            .write(GREETING)
            .read(b"HELO client\r\n")
            .write(b"250 relay.test Hello client\r\n")
            .read(b"MAIL FROM:<a@b.c> SIZE=17\r\n")
            .write(b"552 5.3.4 Message size exceeds fixed limit\r\n")
            .read(b"MAIL FROM:<a@b.c>\r\n")
            .write(b"250 2.1.0 Sender OK\r\n")
            .read(b"RCPT TO:<sales@relay.test>\r\n")
            .write(b"250 2.1.5 Recipient OK\r\n")
            .read(b"DATA\r\n")
            .write(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
            .read(b"Subject: this line is far too long\r\n\r\nbody\r\n.\r\n")
            .write(b"552 5.3.4 Maximum message size exceeded\r\n")
            .read(b"QUIT\r\n")
            .write(b"221 2.0.0 Bye\r\n")
            .build();

        let backend = TestBackend::default();
        handle_connection(mock, None, &backend, &config)
            .await
            .unwrap();
        assert!(backend.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_auth_plain_with_continuation() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"AUTH PLAIN\r\n")
            .write(b"503 5.5.1 Send EHLO first\r\n")
            .read(b"EHLO client\r\n")
            .write(
                b"250-relay.test Hello client\r\n250-8BITMIME\r\n250-SIZE 10485760\r\n250 AUTH PLAIN\r\n",
            )
            .read(b"AUTH LOGIN\r\n")
            .write(b"504 5.5.4 Unsupported authentication mechanism\r\n")
            .read(b"AUTH PLAIN\r\n")
            .write(b"334 \r\n")
            .read(b"bm90LWJhc2U2NA\r\n")
            .write(b"501 5.5.2 Invalid PLAIN credentials\r\n")
            .read(b"AUTH PLAIN\r\n")
            .write(b"334 \r\n")
            .read(b"AGJvYgBzZWNyZXQ=\r\n")
            .write(b"235 2.7.0 Authentication successful\r\n")
            .read(b"AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n")
            .write(b"503 5.5.1 Already authenticated\r\n")
            .build();

        let backend = TestBackend::default();
        handle_connection(mock, None, &backend, &config())
            .await
            .unwrap();
        assert_eq!(
            backend.logins.lock().unwrap().as_slice(),
            &[("bob".to_string(), "secret".to_string())]
        );
    }

    #[tokio::test]
    async fn test_overlong_command_line() {
        let mut long = vec![b'A'; MAX_COMMAND_LINE + 10];
        long.extend_from_slice(b"\r\n");

        let mock = Builder::new()
            .write(GREETING)
            .read(&long)
            .write(b"500 5.5.2 Line too long\r\n")
            .read(b"NOOP\r\n")
            .write(b"250 2.0.0 OK\r\n")
            .build();

        let backend = TestBackend::default();
        handle_connection(mock, None, &backend, &config())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_closed() {
        let (client, server) = tokio::io::duplex(4096);
        let backend = TestBackend::default();
        let handle = tokio::spawn(async move {
            handle_connection(server, None, &backend, &config()).await
        });

        let mut client = tokio::io::BufReader::new(client);
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert_eq!(line, "220 relay.test ESMTP Service Ready\r\n");

        line.clear();
        client.read_line(&mut line).await.unwrap();
        assert_eq!(
            line,
            "421 4.4.2 relay.test Idle timeout, closing connection\r\n"
        );

        handle.await.unwrap().unwrap();
        line.clear();
        assert_eq!(client.read_line(&mut line).await.unwrap(), 0);
    }

    #[test]
    fn test_decode_plain() {
        assert_eq!(
            decode_plain("AHVzZXIAcGFzcw=="),
            Some(("user".to_string(), "pass".to_string()))
        );
        assert_eq!(decode_plain("not base64!"), None);
        assert_eq!(decode_plain("="), None);
    }
}
