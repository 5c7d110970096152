//! portway-client: tunnel client library.
//!
//! Provides the transport channels, the typed RPC stub over the tunnel
//! contract, and the gateway that bridges one local socket through the
//! tunnel with an adaptive polling loop. The binary in `main.rs` wires
//! these to the forward listeners and the admin subcommands.

pub mod client;
pub mod config;
pub mod gateway;
pub mod transport;
