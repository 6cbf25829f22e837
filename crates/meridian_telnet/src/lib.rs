//! # Capability Negotiator
//!
//! Telnet-family clients vary wildly: some answer every option, some
//! answer none, some lie. This crate discovers what each connection can
//! do - window size, terminal type, compression, status info, markup
//! links, out-of-band data - without ever blocking the connection on a
//! silent peer, and exposes the result as a flat capability map the
//! output formatter consults.
//!
//! ## Shape
//!
//! * [`parser::TelnetParser`] - byte state machine splitting application
//!   data from IAC negotiation and subnegotiation
//! * [`options`] - one small state machine per offered option
//! * [`negotiate::Negotiator`] - the handshake counter tying them
//!   together: every option resolves exactly once (accept, refuse or
//!   forced timeout), and when the counter hits zero the session is
//!   handed to the logic process
//! * [`flags::ProtocolFlags`] - the accumulated capability map with
//!   documented defaults
//! * [`mccp::MccpStream`] - one-way zlib compression of the outgoing
//!   byte stream once the client accepts it
//!
//! The negotiator is sans-io: it consumes parser events and queues reply
//! bytes, while the owning connection pump does the socket work and arms
//! the hard two-second timeout.

pub use flags::ProtocolFlags;
pub use mccp::MccpStream;
pub use negotiate::{Negotiator, OobUpdate, NEGOTIATION_TIMEOUT};
pub use options::ServerStatus;
pub use parser::{TelnetEvent, TelnetParser};

pub mod codes;
pub mod flags;
pub mod mccp;
pub mod negotiate;
pub mod options;
pub mod parser;

use thiserror::Error;

/// Errors raised by the telnet layer.
#[derive(Debug, Error)]
pub enum TelnetError {
    /// Subnegotiation payload did not match the option's grammar.
    #[error("bad subnegotiation payload for option {option}: {reason}")]
    BadSubnegotiation { option: u8, reason: String },

    /// The outgoing compression stream failed.
    #[error("mccp stream error: {0}")]
    Compression(String),
}
