//! Owns the input-to-encrypted-cache pipeline: feeds the key reverser,
//! drives `Acquirer` transitions on system packets, detects a cipher
//! switch, and reconnects the live stream with the server's expected
//! ping-on-idle behavior.

pub mod reader;
pub mod stream;

pub use reader::Reader;
pub use stream::{connect, read_stream, PING_BYTE, READ_IDLE_TIMEOUT};
