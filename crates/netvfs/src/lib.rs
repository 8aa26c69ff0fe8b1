#![forbid(unsafe_code)]
//! Asynchronous client for a line oriented remote file system protocol.
//!
//! This crate provides a tokio-based client for a text protocol with binary
//! payloads, used to reach a virtual file system over a single TCP
//! connection. It offers file system operations (list, create, delete,
//! move, copy, attributes, hashes) and seekable random-access file streams.
//!
//! # Overview
//!
//! Requests are single lines: a verb, `-key=value` flags and quoted
//! arguments. The server answers with an `OK` or `ERROR` line carrying
//! `key="value"` tuples, optionally followed by listing lines or a binary
//! payload of declared length, and always ends with `READY`.
//!
//! # Getting Started
//!
//! 1. Build a [`SessionConfig`] for the server address and credentials
//! 2. Connect with [`Session::connect`]
//! 3. Run file system operations, or open a [`RandomAccessStream`] with
//!    [`Session::open_random_access`]
//!
//! # Example
//!
//! ```no_run
//! use std::io::SeekFrom;
//! use netvfs::{FileAccess, NodeType, OpenOptions, Result, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig::new("127.0.0.1:7000").with_credentials("user", "secret");
//!
//!     let listing = Session::connect(config.clone()).await?;
//!     for entry in listing.list("/data", None).await? {
//!         println!("{:?} {}", entry.node_type, entry.name);
//!     }
//!     listing.create("/data/new", NodeType::Directory, false).await?;
//!
//!     // A random-access stream takes over its session until closed.
//!     let session = Session::connect(config).await?;
//!     let options = OpenOptions::new().access(FileAccess::READWRITE);
//!     let mut file = session.open_random_access("/data/log", options).await?;
//!     file.seek(SeekFrom::End(0)).await?;
//!     file.write(b"appended\n").await?;
//!     file.close().await
//! }
//! ```
//!
//! # Sessions
//!
//! A [`Session`] serializes every exchange on its connection. A failed
//! command leaves the session invalid; the next command reconnects and logs
//! in again. Transport failures ([`Error::Io`]) are retried per the
//! session's [`RetryPolicy`]; errors reported by the server are not.
//!
//! # Random access
//!
//! Writes on a [`RandomAccessStream`] do not wait for the server. Their
//! acknowledgments are consumed in the background, and a failure surfaces
//! from the next operation that needs the server's view of the file
//! (read, seek, length, hash or close).
//!
//! The stream owns its session's connection until it is closed. Other
//! session commands fail with [`Error::Busy`] in the meantime; dropping the
//! stream unclosed invalidates the session.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).
#[macro_use]
pub mod utils;
mod ack;
pub mod command;
pub mod error;
pub mod framing;
pub mod retry;
pub mod serialize;
pub mod session;
pub mod stream;

pub use crate::command::*;
pub use crate::error::Error;
pub use crate::retry::RetryPolicy;
pub use crate::session::{Session, SessionConfig, SessionState};
pub use crate::stream::{CloseEvent, OpenOptions, RandomAccessStream};
pub use crate::utils::Result;
