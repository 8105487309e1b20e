//! # mailrelay-smtp
//!
//! SMTP for the mailrelay forwarder: a type-state client used for outbound
//! delivery and a server protocol driver used for the inbound listener.
//!
//! ## Client
//!
//! ```ignore
//! use mailrelay_smtp::{Address, Client, connection::connect};
//! use std::time::Duration;
//!
//! let stream = connect("mx.example.com", 25, Duration::from_secs(10)).await?;
//! let client = Client::from_stream(stream).await?.hello("relay.local").await?;
//! let client = client
//!     .mail_from(Address::new("postmaster@relay.local")?)
//!     .await?
//!     .rcpt_to(Address::new("team@example.com")?)
//!     .await?
//!     .data()
//!     .await?
//!     .send_message(b"Subject: hi\r\n\r\nHello\r\n")
//!     .await?;
//! client.quit().await?;
//! ```
//!
//! The client's states enforce command order at compile time:
//!
//! ```text
//! Connected ── auth_plain() ──→ Authenticated
//!     │                              │
//!     └──────── mail_from() ─────────┘
//!                   ↓
//!            MailTransaction ── rcpt_to() ──→ RecipientAdded ── data() ──→ Data
//! ```
//!
//! ## Server
//!
//! [`server::serve`] accepts connections and drives the protocol; every
//! transaction decision goes to a [`server::Session`] produced by a
//! [`server::Backend`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod server;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, Ready, RecipientAdded, ServerInfo,
    SmtpConnection, StartTlsOutcome,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
