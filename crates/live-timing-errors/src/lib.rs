//! Shared error taxonomy for the live-timing stream engine.
//!
//! Each sub-error mirrors one row of the error taxonomy in the design
//! document (transient I/O, protocol, decryption, authentication, cache,
//! terminal). Leaf crates return these directly; the CLI binary maps the
//! top-level [`StreamError`] to a process exit code.

use thiserror::Error;

/// Errors returned by [`live-timing-cache`](../live_timing_cache/index.html)
/// operations. Named after the four non-zero return codes the original
/// `packetcache.c` used (`PACKETCACHE_ERR_*`), plus `Cnum` for a bad handle.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CacheError {
    /// Underlying file I/O failed (open/read/write/seek).
    #[error("packet cache file operation failed")]
    File,
    /// The backing file's signature does not match the expected version.
    #[error("packet cache file version mismatch")]
    Version,
    /// Allocation of a new chunk holder array failed.
    #[error("packet cache out of memory")]
    Nomem,
    /// A size or index computation would overflow.
    #[error("packet cache overflow")]
    Overflow,
    /// The iterator or cache handle does not refer to a live cache.
    #[error("invalid packet cache handle")]
    Cnum,
}

/// Errors from the HTTP-driven acquisition state machine.
#[derive(Debug, Error)]
pub enum AcquirerError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("login failed: check email and password")]
    AuthRejected,
    #[error("key request failed: {0}")]
    KeyRequestFailed(String),
    #[error("key frame request failed: {0}")]
    FrameRequestFailed(String),
    #[error("total laps request failed: {0}")]
    TotalLapsRequestFailed(String),
    #[error("a {0} request is already in flight")]
    AlreadyObtaining(&'static str),
}

/// Errors from the input-to-encrypted-cache pipeline: reconnection,
/// cipher-switch handling, and the pre-handler's cache writes.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("stream connect failed: {0}")]
    Connect(String),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("stream write failed: {0}")]
    Write(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Acquirer(#[from] AcquirerError),
}

/// Errors surfaced while reading or writing the `~/.f1rc` configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME environment variable is not set")]
    NoHome,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("credential prompt failed: {0}")]
    Prompt(String),
}

/// Top-level error returned from the stream engine's main loop. Maps onto
/// the exit codes documented in the CLI surface (0 success, 1 setup
/// failure, 2 unrecoverable stream failure, 10 terminal too small).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Acquirer(#[from] AcquirerError),
    #[error("packet cache error: {0}")]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("authentication failed: check email and password")]
    AuthenticationFailed,
    #[error("terminal too small")]
    TerminalTooSmall,
    #[error("unrecoverable stream failure: {0}")]
    Unrecoverable(String),
}

impl StreamError {
    /// Exit code this error should produce from the CLI binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            StreamError::TerminalTooSmall => 10,
            StreamError::Setup(_) | StreamError::Config(_) | StreamError::AuthenticationFailed => 1,
            StreamError::Acquirer(_) | StreamError::Cache(_) | StreamError::Reader(_) | StreamError::Unrecoverable(_) => {
                2
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(StreamError::TerminalTooSmall.exit_code(), 10);
        assert_eq!(StreamError::AuthenticationFailed.exit_code(), 1);
        assert_eq!(StreamError::Unrecoverable("eof".into()).exit_code(), 2);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        /// No matter what text ends up inside a message-carrying variant,
        /// `exit_code` always lands on one of the three codes the CLI
        /// contract defines, never 0 (reserved for success).
        #[test]
        fn prop_exit_code_never_zero_regardless_of_message(msg in ".{0,64}") {
            let variants = [
                StreamError::Setup(msg.clone()),
                StreamError::Unrecoverable(msg.clone()),
                StreamError::Cache(CacheError::File),
                StreamError::Acquirer(AcquirerError::Transport(msg.clone())),
                StreamError::Reader(ReaderError::Connect(msg.clone())),
                StreamError::Reader(ReaderError::Cache(CacheError::Overflow)),
                StreamError::Reader(ReaderError::Acquirer(AcquirerError::AuthRejected)),
            ];
            for variant in variants {
                let code = variant.exit_code();
                prop_assert!(matches!(code, 1 | 2 | 10));
            }
        }

        /// A `ReaderError` wrapping an `AcquirerError` must still exit 2
        /// once it reaches `StreamError`, the same as a bare `Acquirer`
        /// failure — wrapping through the reader must not change the
        /// severity category.
        #[test]
        fn prop_wrapped_acquirer_failure_keeps_exit_code(msg in ".{0,64}") {
            let bare = StreamError::Acquirer(AcquirerError::Transport(msg.clone()));
            let wrapped = StreamError::Reader(ReaderError::Acquirer(AcquirerError::Transport(msg)));
            prop_assert_eq!(bare.exit_code(), wrapped.exit_code());
        }
    }
}
