//! portway-core: Shared protocol library for the portway tunnel.
//!
//! Provides the request/response wire types, length-prefixed framing,
//! the binary/text wire formats, the error taxonomy, the socket liveness
//! probe, and the byte obfuscator shared by client and server.

pub mod codec;
pub mod error;
pub mod messages;
pub mod probe;
pub mod scramble;

// Re-export commonly used items at crate root.
pub use codec::{frame_decode, frame_encode, FrameDecoder, WireFormat};
pub use error::{TunnelError, TunnelResult};
pub use messages::{TunnelRequest, TunnelResponse};
pub use probe::{probe, ProbeReport};
pub use scramble::scramble;

/// IO buffer size for tunnel reads on both legs (bytes).
pub const BUFFER_SIZE: usize = 32768;
