//! `arq-over-udp`: reliable one-way file transfer over UDP.
//!
//! A sender reads a byte stream, cuts it into numbered segments and keeps
//! retransmitting each one until the receiver acknowledges it.  The receiver
//! writes the stream back out strictly in order.  Two disciplines are
//! supported: stop-and-wait (one segment in flight) and sliding window with
//! selective, per-segment acknowledgments.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────┐   DATA segments   ┌────────────────┐
//!  │ SendConnection │──────────────────▶│ RecvConnection │
//!  │  └ SendWindow  │◀──────────────────│  └ RecvWindow  │
//!  └───────┬────────┘   per-segment ACK └───────┬────────┘
//!          │                                    │
//!  ┌───────▼────────────────────────────────────▼───────┐
//!  │        Transport (Socket or SimTransport)          │
//!  └────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`config`]: transfer parameters and their validation
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`seq`]: sequence arithmetic that survives 32-bit wrap-around
//! - [`window`]: fixed-capacity slot ring with per-slot timers
//! - [`timer`]: retransmission policy and idle timer
//! - [`state`]: lifecycle states shared by both engines
//! - [`sender`] / [`receiver`]: window state machines, no I/O
//! - [`connection`]: the async engines, cancellation and reports
//! - [`socket`]: async UDP socket abstraction
//! - [`simulator`]: lossy in-memory network for testing

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use config::{ConfigError, Mode, TransferConfig};
pub use connection::{
    shutdown_channel, FailureReason, ReceiveReport, RecvConnection, SendConnection, SendReport,
    Shutdown, ShutdownTrigger, TransferError,
};
pub use socket::{Socket, Transport, TransportError};
