//! Durable, chunked, ref-counted packet cache used both to buffer the
//! live stream for the model updater and to back replay mode.

pub mod cache;
pub mod record;

pub use cache::{PacketCache, PacketIterator, MIN_CHUNKS_CACHE_SIZE, PACKET_CHUNK_SIZE};
