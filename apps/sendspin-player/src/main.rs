//! SendSpin Player - connects to a SendSpin server and plays synchronized audio.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use sendspin_core::config::PlayerConfig;
use sendspin_core::events::{EventEmitter, ForwardingEventEmitter, LoggingEventEmitter};
use sendspin_core::filter::ClockFilter;
use sendspin_core::lifecycle::{Lifecycle, ProcessLifecycle};
use sendspin_core::protocol::codec::CodecTag;
use sendspin_core::protocol::constants::CLOSE_NORMAL;
use sendspin_core::protocol::messages::{ControlMessage, DeviceInfo};
use sendspin_core::runtime::{TaskSpawner, TokioSpawner};
use sendspin_core::scheduler::codec_decoder::{CodecParams, ResilientDecoder};
use sendspin_core::scheduler::{ChunkQueueEntry, SyncScheduler};
use sendspin_core::sink::CpalSink;
use sendspin_core::timesync::TimeSyncEngine;
use sendspin_core::transport::SessionTransport;
use tokio::signal;

/// SendSpin Player - connects to a SendSpin server and plays synchronized audio.
#[derive(Parser, Debug)]
#[command(name = "sendspin-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SENDSPIN_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Server WebSocket URL (overrides config file).
    #[arg(short, long, env = "SENDSPIN_SERVER_URL")]
    server_url: Option<String>,

    /// Player identifier (overrides config file).
    #[arg(long, env = "SENDSPIN_PLAYER_ID")]
    player_id: Option<String>,
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("sendspin-player v{}", env!("CARGO_PKG_VERSION"));

    let mut config = PlayerConfig::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    if let Some(server_url) = args.server_url {
        config.server_url = server_url;
    }
    if let Some(player_id) = args.player_id {
        config.player_id = player_id;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let spawner = TokioSpawner::current();
    let (player_state_tx, mut player_state_rx) =
        tokio::sync::mpsc::unbounded_channel::<sendspin_core::protocol::messages::PlayerStateTag>();
    let emitter: Arc<dyn EventEmitter> = Arc::new(ForwardingEventEmitter::new(
        LoggingEventEmitter,
        player_state_tx,
    ));

    log::info!("connecting to {}", config.server_url);
    let transport = Arc::new(
        SessionTransport::connect(&config.server_url, emitter.clone())
            .await
            .context("failed to connect to server")?,
    );

    let player_state_transport = transport.clone();
    spawner.spawn(async move {
        while let Some(tag) = player_state_rx.recv().await {
            let _ = player_state_transport
                .send(&ControlMessage::PlayerState {
                    state: tag,
                    position_us: None,
                    volume: None,
                })
                .await;
        }
    });

    let hello = match transport.recv().await {
        Some(ControlMessage::ServerHello {
            server_version,
            requires_auth,
            ..
        }) => {
            log::info!("server hello: version={server_version} requires_auth={requires_auth}");
            requires_auth
        }
        other => {
            anyhow::bail!("expected server/hello, got {other:?}");
        }
    };

    if hello {
        let token = config
            .auth_token
            .clone()
            .context("server requires auth but no auth_token is configured")?;
        transport.auth(token).await.context("authentication failed")?;
    }

    transport
        .send(&ControlMessage::ClientHello {
            player_id: config.player_id.clone(),
            player_name: config.player_name.clone(),
            preferred_codec: config.preferred_codec.clone(),
            device_info: DeviceInfo {
                channels: config.channels,
                sample_rate_hz: config.sample_rate_hz,
                bit_depth: 16,
                buffer_capacity: config.chunk_queue_capacity as u32,
                supported_commands: vec!["pause".into(), "resume".into(), "flush".into()],
            },
        })
        .await
        .context("failed to send client/hello")?;

    let filter = Arc::new(ClockFilter::new());
    let sink = CpalSink::default();
    let scheduler = Arc::new(SyncScheduler::new(filter.clone(), sink, emitter.clone()));

    let time_sync = Arc::new(TimeSyncEngine::new(filter.clone(), emitter.clone()));
    let (probe_tx, mut probe_rx) = tokio::sync::mpsc::unbounded_channel::<ControlMessage>();
    let (resp_tx, resp_rx) = tokio::sync::mpsc::unbounded_channel::<ControlMessage>();

    let probe_transport = transport.clone();
    tokio::spawn(async move {
        while let Some(msg) = probe_rx.recv().await {
            if probe_transport.send(&msg).await.is_err() {
                return;
            }
        }
    });

    let time_sync_handle = tokio::spawn({
        let time_sync = time_sync.clone();
        async move {
            time_sync
                .run(probe_tx, resp_rx, Duration::from_secs(30), now_us)
                .await;
        }
    });

    let decoder = Arc::new(tokio::sync::Mutex::new(
        ResilientDecoder::new(
            codec_tag_for(&config.preferred_codec),
            CodecParams {
                channels: config.channels,
                sample_rate_hz: config.sample_rate_hz,
            },
        )
        .map_err(|e| anyhow::anyhow!("failed to initialize decoder: {e}"))?,
    ));
    let current_stream_id = Arc::new(AtomicI64::new(-1));
    let decoder_tag = codec_tag_for(&config.preferred_codec);
    let decoder_params = CodecParams {
        channels: config.channels,
        sample_rate_hz: config.sample_rate_hz,
    };
    let sync_offset_us = config.sync_offset_ms * 1_000;

    let audio_transport = transport.clone();
    let audio_scheduler = scheduler.clone();
    let audio_decoder = decoder.clone();
    tokio::spawn(async move {
        while let Some(record) = audio_transport.recv_audio().await {
            if current_stream_id.swap(record.stream_id as i64, Ordering::AcqRel)
                != record.stream_id as i64
            {
                if audio_scheduler
                    .start_stream(record.channels, record.sample_rate_hz)
                    .is_err()
                {
                    continue;
                }
            }
            let mut decoder = audio_decoder.lock().await;
            match decoder.decode(&record.payload) {
                Ok(pcm) => {
                    let frame_count = (pcm.len() / record.channels.max(1) as usize) as u32;
                    audio_scheduler.enqueue_chunk(ChunkQueueEntry {
                        target_server_us: record.target_server_us + sync_offset_us,
                        pcm,
                        frame_count,
                        stream_generation: audio_scheduler.state().current_generation,
                    });
                }
                Err(e) => {
                    // Retries are already exhausted by the time this error
                    // surfaces. Rather than silently dropping the frame, start
                    // a new generation and rebuild the decoder from scratch —
                    // late chunks tagged with the old generation are dropped
                    // by the scheduler's own generation check, so this is
                    // safe regardless of what's still in flight.
                    log::warn!("decode failed after retries exhausted, reconfiguring stream: {e}");
                    audio_scheduler.flush();
                    current_stream_id.store(-1, Ordering::Release);
                    match ResilientDecoder::new(decoder_tag, decoder_params) {
                        Ok(fresh) => *decoder = fresh,
                        Err(e) => log::error!("failed to rebuild decoder: {e}"),
                    }
                }
            }
        }
    });

    let tick_scheduler = scheduler.clone();
    let tick_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        loop {
            interval.tick().await;
            tick_scheduler.tick(now_us());
        }
    });

    let control_transport = transport.clone();
    let control_handle = tokio::spawn(async move {
        while let Some(msg) = control_transport.recv().await {
            match msg {
                ControlMessage::TimeResp { .. } => {
                    let _ = resp_tx.send(msg);
                }
                ControlMessage::Close { code, reason } => {
                    log::info!("server requested close: {code} {reason}");
                    return;
                }
                other => {
                    log::debug!("unhandled control message: {other:?}");
                }
            }
        }
    });

    shutdown_signal().await;
    log::info!("shutdown signal received, closing session");

    tick_handle.abort();
    control_handle.abort();
    time_sync.cancel();
    time_sync_handle.abort();
    scheduler.stop();
    let _ = transport.close(CLOSE_NORMAL, "client shutting down").await;

    log::info!("shutdown complete");
    ProcessLifecycle.request_shutdown();
    Ok(())
}

fn codec_tag_for(name: &str) -> CodecTag {
    match name {
        "opus" => CodecTag::Opus,
        "flac" => CodecTag::Flac,
        _ => CodecTag::Pcm,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
