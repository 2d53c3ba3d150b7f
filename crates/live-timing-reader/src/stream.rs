//! Live-stream connection handling: framing bytes off the wire into the
//! input cache, and the idle-ping/reconnect behavior the server expects.
//!
//! The server never pushes data on an otherwise-quiet connection; the
//! client has to nudge it with a single `0x10` byte whenever the
//! connection has been silent for a second. An EOF or read error just
//! ends this call — the caller is expected to reconnect and call again,
//! since pending acquirer requests outlive a reconnect.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use live_timing_cache::PacketCache;
use live_timing_errors::ReaderError;
use live_timing_protocol::Framer;

/// Single-byte keep-alive the server expects on an idle connection.
pub const PING_BYTE: u8 = 0x10;
/// How long the connection may go quiet before a ping is sent.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

/// Open a plain TCP connection to the live-timing host.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, ReaderError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| ReaderError::Connect(e.to_string()))
}

/// Read `socket` until EOF or error, framing bytes and appending every
/// decoded packet to `input`. `now` supplies the cache timestamp for
/// each packet (wall-clock time in production, a fixed clock in tests).
pub async fn read_stream<S>(mut socket: S, input: &mut PacketCache, now: impl Fn() -> i64) -> Result<(), ReaderError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = Framer::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match timeout(READ_IDLE_TIMEOUT, socket.read(&mut buf)).await {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => {
                framer.feed(&buf[..n]);
                for packet in framer.drain_packets(now()) {
                    input.push(&packet, now())?;
                }
            }
            Ok(Err(e)) => return Err(ReaderError::Read(e.to_string())),
            Err(_elapsed) => {
                tracing::debug!("stream idle, sending ping");
                socket
                    .write_all(&[PING_BYTE])
                    .await
                    .map_err(|e| ReaderError::Write(e.to_string()))?;
            }
        }
    }
}
