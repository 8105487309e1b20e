//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

/// How long to wait for a single reply line (RFC 5321 section 4.5.3.2 minimums).
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest reply line accepted from a peer.
const MAX_REPLY_LINE: u64 = 4096;

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(BufReader<TcpStream>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Reads a line from the stream, without the trailing line break.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails, times out, or the peer closed the
    /// connection.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let read = async {
            match self {
                Self::Tcp(reader) => {
                    reader
                        .take(MAX_REPLY_LINE)
                        .read_until(b'\n', &mut buf)
                        .await
                }
                Self::Tls(reader) => {
                    (&mut **reader)
                        .take(MAX_REPLY_LINE)
                        .read_until(b'\n', &mut buf)
                        .await
                }
            }
        };

        let n = tokio::time::timeout(READ_TIMEOUT, read)
            .await
            .map_err(|_| Error::Timeout(READ_TIMEOUT))??;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        Ok(String::from_utf8_lossy(&buf).trim_end().to_string())
    }

    /// Writes data to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
            Self::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
        }
        Ok(())
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a TCP stream to TLS, verifying the certificate against `hostname`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails. The underlying connection
    /// is consumed either way.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        let tcp_stream = match self {
            Self::Tcp(reader) => reader.into_inner(),
            Self::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let connector = create_tls_connector();
        let server_name = server_name(hostname)?;

        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        Ok(Self::Tls(Box::new(BufReader::new(tls_stream))))
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or does not complete within
/// `connect_timeout`.
pub async fn connect(hostname: &str, port: u16, connect_timeout: Duration) -> Result<SmtpStream> {
    let stream = dial(hostname, port, connect_timeout).await?;
    Ok(SmtpStream::Tcp(BufReader::new(stream)))
}

/// Connects to an SMTP server over TLS (implicit TLS on port 465).
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails.
pub async fn connect_tls(
    hostname: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<SmtpStream> {
    let tcp_stream = dial(hostname, port, connect_timeout).await?;

    let connector = create_tls_connector();
    let server_name = server_name(hostname)?;

    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    Ok(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))))
}

async fn dial(hostname: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{hostname}:{port}");
    tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout(connect_timeout))?
        .map_err(Into::into)
}

fn server_name(hostname: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}
