//! # recdb API
//!
//! Message protocol for remote access to recdb databases.
//!
//! This crate provides:
//! - Request parsing and response encoding for `opID|method|args` messages
//! - [`Session`], which runs requests against an [`recdb_core::Interface`]
//!   and queues responses for any transport
//!
//! The transport itself (websocket, pipe, socket) is left to the host: it
//! feeds incoming messages to [`Session::handle`] and writes whatever
//! arrives on the session's receiver.
//!
//! ```no_run
//! use recdb_api::{Session, SessionConfig};
//! use recdb_core::{Config, DatabaseSystem, Interface, Options};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let system = DatabaseSystem::initialize(Config::new("data"))?;
//! let db = Arc::new(Interface::new(system, Options::default().local(true)));
//! let (session, mut responses) = Session::new(db, SessionConfig::default());
//!
//! session.handle(b"1|get|core:settings/theme")?;
//! if let Some(response) = responses.recv().await {
//!     println!("{}", String::from_utf8_lossy(&response));
//! }
//! session.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod message;
mod session;

pub use config::SessionConfig;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Method, Request, Response};
pub use session::Session;
