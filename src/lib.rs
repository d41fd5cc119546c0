#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! vesper-bridge library — exposes the bridge's building blocks for the
//! `vesper-bridge` binary and for integration tests.
//!
//! - `config` — configuration loading and defaults
//! - `device` — local endpoint backends (serial, PTY, Unix socket, TCP
//!   socket, Windows named pipe)
//! - `modem` — Hayes AT command interpreter and result-code framing
//! - `handshake` — the remote login handshake
//! - `pump` — the bidirectional byte pump
//! - `supervisor` — the session state machine tying the above together
//! - `error` — the shared error taxonomy and exit-code mapping

pub mod config;
pub mod device;
pub mod error;
pub mod handshake;
pub mod modem;
pub mod pump;
pub mod supervisor;

pub use config::Config;
pub use error::{BridgeError, Result};
