//! # mailrelay-core
//!
//! Forwarding logic for the `mailrelay` MTA.
//!
//! This crate provides:
//! - Environment configuration
//! - Rule, log and domain storage (`SQLite`)
//! - Recipient routing by regular expression
//! - The SMTP session backend used by the inbound listener
//! - A bounded dispatch queue with a worker pool
//! - Outbound forwarding through a relay or directly to MX hosts
//!
//! ## Flow
//!
//! ```text
//! RCPT ─► Router ─► bound rule
//! DATA ─► extract ─► Recorder::begin ─► DispatchQueue
//!                                          │
//!                          worker ◄────────┘
//!                            │
//!                            ├─► Dispatcher::forward
//!                            └─► Recorder::complete
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
mod error;
pub mod queue;
pub mod recorder;
pub mod router;
pub mod service;
pub mod session;
pub mod store;

pub use config::{Config, RelayConfig};
pub use dispatch::{Deliver, DeliveryMode, Dispatcher, ForwardRequest, MxRecord, MxResolver};
pub use error::{DeliveryError, Error, Result, SessionError};
pub use queue::{DispatchJob, DispatchQueue, WorkerPool, spawn_workers};
pub use recorder::Recorder;
pub use router::{Router, invalid_rules, validate_pattern};
pub use service::RelayService;
pub use session::{RelayBackend, RelaySession};
pub use store::{Database, Domain, LogEntry, LogId, LogPage, LogStatus, Rule, RuleId};
