use anyhow::{Context, Result};
use futures::StreamExt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};

use livedance_tracker::config::Config;
use livedance_tracker::logging;
use livedance_tracker::pipeline::PoseResult;
use livedance_tracker::protocol::{self, ClientMessage, ServerMessage};
use livedance_tracker::server::{ServerContext, VERSION};

const CONFIG_PATH: &str = "pose_server.toml";

// ===========================================================================
// Per-client session
// ===========================================================================

async fn handle_client(
    stream: TcpStream,
    ctx: Arc<ServerContext>,
    mut results: broadcast::Receiver<PoseResult>,
) -> Result<()> {
    let framed = protocol::message_stream(stream);
    let (mut sink, mut reader) = framed.split();

    loop {
        tokio::select! {
            incoming = reader.next() => {
                let bytes = match incoming {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };
                let msg: ClientMessage = match protocol::decode(&bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("undecodable message: {:#}", e);
                        let reply = ServerMessage::Error { message: format!("bad message: {}", e) };
                        protocol::send_to_sink(&mut sink, &reply).await?;
                        continue;
                    }
                };
                let reply = match msg {
                    // slot put only, never blocks
                    frame @ ClientMessage::Frame { .. } => ctx.handle(frame),
                    // reports and screenshots touch the disk
                    other => {
                        let ctx = Arc::clone(&ctx);
                        tokio::task::spawn_blocking(move || ctx.handle(other)).await?
                    }
                };
                if let Some(reply) = reply {
                    protocol::send_to_sink(&mut sink, &reply).await?;
                }
            }
            result = results.recv() => match result {
                Ok(pose) => protocol::send_to_sink(&mut sink, &ServerMessage::Pose(pose)).await?,
                Err(RecvError::Lagged(n)) => log::debug!("client lagging, skipped {} results", n),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

/// accept 結果を検査し、失敗した接続だけを捨てる
fn prepare_client(
    accepted: std::io::Result<(TcpStream, SocketAddr)>,
) -> Option<(TcpStream, SocketAddr)> {
    let (stream, addr) = match accepted {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("accept failed: {}", e);
            return None;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("set_nodelay failed for {}: {}", addr, e);
        return None;
    }
    Some((stream, addr))
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config_found = Path::new(&config_path).exists();
    let config = Config::load_or_default(&config_path)?;
    logging::init(&config.server.log_dir, "pose_server", config.server.verbose)?;

    log::info!("Pose Server ({})", VERSION);
    if config_found {
        log::info!("Config: {}", config_path);
    } else {
        log::warn!("Config: {} not found, using defaults", config_path);
    }
    log::info!("Listen: {}", config.server.listen_addr);
    if config.server.verbose {
        log::info!("Verbose mode: ON");
    }

    let ctx = Arc::new(ServerContext::new(&config)?);

    // SIGINT / SIGTERM → stop the inference loop and exit
    let stop = ctx.stop_flag();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let (results_tx, _) = broadcast::channel::<PoseResult>(config.server.result_buffer.max(1));

    let bind_addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .context("invalid listen_addr")?;
    let listener = TcpListener::bind(bind_addr).await?;
    log::info!("Listening on {}", bind_addr);

    let mut shutdown_check = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Some((tcp_stream, addr)) = prepare_client(accepted) else {
                    continue;
                };
                log::info!("Client connected: {}", addr);

                // lazily start inference on the first connection
                if ctx.ensure_inference_started(results_tx.clone())? {
                    log::info!("Inference started");
                }

                let ctx = Arc::clone(&ctx);
                let results = results_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(tcp_stream, ctx, results).await {
                        log::warn!("client {} error: {:#}", addr, e);
                    }
                    log::info!("Client disconnected: {}", addr);
                });
            }
            _ = shutdown_check.tick() => {
                if stop.load(Ordering::Relaxed) {
                    log::info!("Shutdown requested");
                    break;
                }
            }
        }
    }

    ctx.shutdown();
    log::logger().flush();
    Ok(())
}
