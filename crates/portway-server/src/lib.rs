//! portway-server: tunnel server library.
//!
//! Owns the session/connection registry, the tunnel service operations,
//! the idle-timeout sweeper, and the transport listeners. The binary in
//! `main.rs` wires these together.

pub mod config;
pub mod registry;
pub mod server;
pub mod service;
pub mod sweeper;
pub mod transport;
