//! Binary entry point: wires the config/credential flow, the HTTP
//! acquirer, the reader's input-to-encrypted-cache pipeline, and the
//! model updater into one current-thread event loop.

mod cli;
mod view_log;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use live_timing_acquirer::{Acquirer, ReqwestTransport};
use live_timing_cache::{PacketCache, PacketIterator};
use live_timing_config::{default_path, fill_missing_credentials, read_config, write_config, DialoguerPrompt};
use live_timing_errors::StreamError;
use live_timing_model::ModelUpdater;
use live_timing_protocol::Framer;
use live_timing_reader::{connect, Reader, PING_BYTE, READ_IDLE_TIMEOUT};

use cli::Cli;
use view_log::TracingViewSink;

/// Default live-timing data/auth host, used when neither a CLI flag nor
/// the config file names one.
const DEFAULT_HOST: &str = "live-timing.formula1.com";
const STREAM_PORT: u16 = 4321;
/// How often the main loop advances the model clock and drains whatever
/// the reader has made available.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Seconds elapsed since this clock was created. `ModelUpdater::advance_clock`
/// only ever steps `model_time` forward by one per call, so every caller
/// needs a clock that starts near zero rather than a raw Unix epoch
/// stamp, or catching up to "now" on connect would take decades.
struct SessionClock {
    start: i64,
}

impl SessionClock {
    fn new() -> Self {
        Self { start: now_unix() }
    }

    fn elapsed(&self) -> i64 {
        now_unix() - self.start
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "exiting");
            std::process::ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn default_cache_path() -> Result<PathBuf, StreamError> {
    let home = dirs::home_dir().ok_or_else(|| StreamError::Setup("unable to find HOME in environment".into()))?;
    Ok(home.join(".f1data"))
}

/// The encrypted cache is a working artifact of this run, not the named
/// `~/.f1data` trace; it lives alongside it so replay of the same trace
/// always starts from a clean slate.
fn encrypted_cache_path(input_path: &Path) -> PathBuf {
    let mut name = input_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    name.push_str(".working");
    input_path.with_file_name(name)
}

async fn run(cli: Cli) -> Result<(), StreamError> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_path().map_err(StreamError::Config)?,
    };
    let mut config = read_config(&config_path).map_err(StreamError::Config)?;

    if !cli.replay && (config.email.is_none() || config.password.is_none()) {
        config = fill_missing_credentials(config, &DialoguerPrompt).map_err(StreamError::Config)?;
        write_config(&config_path, &config).map_err(StreamError::Config)?;
    }

    let host = cli.host.clone().or_else(|| config.host.clone()).unwrap_or_else(|| DEFAULT_HOST.to_string());
    let auth_host = cli
        .auth_host
        .clone()
        .or_else(|| config.auth_host.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let cache_path = match &cli.file {
        Some(path) => path.clone(),
        None => default_cache_path()?,
    };
    let encrypted_path = encrypted_cache_path(&cache_path);

    let transport = ReqwestTransport::new();
    let mut acquirer = Acquirer::new(transport, auth_host, host.clone());

    if !cli.replay {
        let email = config.email.clone().ok_or_else(|| StreamError::Setup("no email configured".into()))?;
        let password = config.password.clone().ok_or_else(|| StreamError::Setup("no password configured".into()))?;
        acquirer.request_auth(&email, &password).await?;
        tracing::info!("authenticated");
    }

    let mut reader = Reader::new(acquirer);
    let mut encrypted = PacketCache::open(&encrypted_path, false).map_err(StreamError::Cache)?;
    let mut updater = ModelUpdater::new(TracingViewSink);

    if cli.replay {
        replay(&cache_path, &mut reader, &mut encrypted, &mut updater).await
    } else {
        live(&cache_path, &host, &mut reader, &mut encrypted, &mut updater).await
    }
}

/// Drive the model purely from a previously recorded trace: every
/// packet is already durable, so there is no idle-ping/reconnect
/// behavior to simulate, only the drain-then-tick pump.
async fn replay(
    cache_path: &Path,
    reader: &mut Reader<ReqwestTransport>,
    encrypted: &mut PacketCache,
    updater: &mut ModelUpdater<TracingViewSink>,
) -> Result<(), StreamError> {
    let mut input = PacketCache::open(cache_path, true).map_err(StreamError::Cache)?;
    let mut cursor = PacketIterator::default();
    let mut last_at = 0i64;

    loop {
        let packet = match input.get(&mut cursor).map_err(StreamError::Cache)? {
            Some(packet) => packet,
            None => break,
        };
        last_at = last_at.max(packet.at);
        reader.set_saving_time(packet.at);
        reader.pre_handle_packet(encrypted, &packet, false).await?;
        input.to_next(&mut cursor).map_err(StreamError::Cache)?;
    }

    loop {
        let applied = updater.tick(encrypted, last_at).map_err(StreamError::Cache)?;
        if applied == 0 {
            break;
        }
    }
    tracing::info!("replay complete");
    Ok(())
}

/// Live mode: reconnects on every stream drop, resetting the packet
/// pipeline's per-event transients the way the original's outer loop
/// resets `CurrentState` on each socket reopen.
async fn live(
    cache_path: &Path,
    host: &str,
    reader: &mut Reader<ReqwestTransport>,
    encrypted: &mut PacketCache,
    updater: &mut ModelUpdater<TracingViewSink>,
) -> Result<(), StreamError> {
    let mut input = PacketCache::open(cache_path, false).map_err(StreamError::Cache)?;
    let mut cursor = PacketIterator::default();
    let clock = SessionClock::new();

    loop {
        let mut socket = connect(host, STREAM_PORT).await?;
        tracing::info!(host, port = STREAM_PORT, "connected to data stream");

        let mut framer = Framer::new();
        let mut buf = [0u8; 4096];
        let mut tick = tokio::time::interval(TICK_INTERVAL);

        let disconnect_reason = 'connection: loop {
            tokio::select! {
                biased;

                _ = tick.tick() => {
                    let now = clock.elapsed();
                    reader.set_saving_time(now);
                    while let Some(packet) = input.get(&mut cursor).map_err(StreamError::Cache)? {
                        reader.pre_handle_packet(encrypted, &packet, false).await?;
                        input.to_next(&mut cursor).map_err(StreamError::Cache)?;
                    }
                    updater.tick(encrypted, now).map_err(StreamError::Cache)?;
                }

                result = tokio::time::timeout(READ_IDLE_TIMEOUT, socket.read(&mut buf)) => {
                    match result {
                        Ok(Ok(0)) => break 'connection None,
                        Ok(Ok(n)) => {
                            framer.feed(&buf[..n]);
                            let now = clock.elapsed();
                            for packet in framer.drain_packets(now) {
                                input.push(&packet, now).map_err(StreamError::Cache)?;
                            }
                        }
                        Ok(Err(e)) => break 'connection Some(e.to_string()),
                        Err(_elapsed) => {
                            socket
                                .write_all(&[PING_BYTE])
                                .await
                                .map_err(|e| StreamError::Unrecoverable(e.to_string()))?;
                        }
                    }
                }
            }
        };

        match disconnect_reason {
            Some(reason) => return Err(StreamError::Unrecoverable(reason)),
            None => tracing::info!("stream closed, reconnecting"),
        }
    }
}
