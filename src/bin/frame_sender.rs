use anyhow::{bail, Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use livedance_tracker::logging;
use livedance_tracker::protocol::{self, ClientMessage, ServerMessage};

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_FPS: f64 = 15.0;
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

struct Args {
    addr: String,
    image_dir: PathBuf,
    use_3d: bool,
    fps: f64,
    track: bool,
    export: bool,
}

fn usage() -> ! {
    eprintln!("Usage: frame_sender <image_dir> [--addr HOST:PORT] [--fps N] [--3d] [--track] [--export]");
    std::process::exit(2);
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        addr: DEFAULT_ADDR.to_string(),
        image_dir: PathBuf::new(),
        use_3d: false,
        fps: DEFAULT_FPS,
        track: false,
        export: false,
    };
    let mut dir = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--addr" => parsed.addr = args.next().context("--addr needs a value")?,
            "--fps" => {
                let v = args.next().context("--fps needs a value")?;
                parsed.fps = v.parse().with_context(|| format!("invalid fps: {}", v))?;
            }
            "--3d" => parsed.use_3d = true,
            "--track" => parsed.track = true,
            "--export" => parsed.export = true,
            "-h" | "--help" => usage(),
            other if other.starts_with("--") => bail!("unknown option: {}", other),
            other => dir = Some(PathBuf::from(other)),
        }
    }
    parsed.image_dir = match dir {
        Some(d) => d,
        None => usage(),
    };
    if parsed.fps <= 0.0 {
        bail!("fps must be positive");
    }
    Ok(parsed)
}

/// 拡張子で画像ファイルを抽出し、名前順に並べる
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

async fn expect_reply(replies: &mut mpsc::Receiver<ServerMessage>) -> Result<ServerMessage> {
    match tokio::time::timeout(REPLY_TIMEOUT, replies.recv()).await {
        Ok(Some(msg)) => Ok(msg),
        Ok(None) => bail!("connection closed"),
        Err(_) => bail!("no reply within {:?}", REPLY_TIMEOUT),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    logging::init("logs", "frame_sender", false)?;

    let images = list_images(&args.image_dir)?;
    if images.is_empty() {
        bail!("no images in {}", args.image_dir.display());
    }
    log::info!("{} images from {}", images.len(), args.image_dir.display());

    let tcp = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    tcp.set_nodelay(true)?;
    log::info!("[tcp] connected to {}", args.addr);

    let (mut sink, mut reader) = protocol::message_stream(tcp).split();

    // Pose results are printed here; everything else goes back to main
    let (reply_tx, mut replies) = mpsc::channel::<ServerMessage>(8);
    let reader_task = tokio::spawn(async move {
        while let Some(Ok(bytes)) = reader.next().await {
            match protocol::decode::<ServerMessage>(&bytes) {
                Ok(ServerMessage::Pose(pose)) => {
                    println!(
                        "seq={} mode={} body={} hands={}/{} angles={} total={:.1}ms drop={}",
                        pose.sequence,
                        pose.mode.as_str(),
                        pose.body.len(),
                        pose.hands.left.len(),
                        pose.hands.right.len(),
                        pose.pose_3d_angles.len(),
                        pose.timings.total,
                        pose.dropped_frames,
                    );
                }
                Ok(other) => {
                    if reply_tx.send(other).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("undecodable reply: {:#}", e),
            }
        }
    });

    protocol::send_to_sink(&mut sink, &ClientMessage::Health).await?;
    if let ServerMessage::Health { version } = expect_reply(&mut replies).await? {
        log::info!("server version {}", version);
    }

    if args.track {
        protocol::send_to_sink(&mut sink, &ClientMessage::StartTracking).await?;
        if let ServerMessage::Status(status) = expect_reply(&mut replies).await? {
            log::info!("tracking session {}", status.session_id);
        }
    }

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps);
    let start = Instant::now();
    for (i, path) in images.iter().enumerate() {
        let image = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let msg = ClientMessage::Frame {
            timestamp: start.elapsed().as_secs_f64() * 1000.0,
            sequence: i as u64,
            use_3d: args.use_3d,
            image,
        };
        protocol::send_to_sink(&mut sink, &msg).await?;
        tokio::time::sleep(frame_interval).await;
    }

    // let the last results arrive
    tokio::time::sleep(Duration::from_millis(500)).await;

    if args.track {
        protocol::send_to_sink(&mut sink, &ClientMessage::StopTracking).await?;
        match expect_reply(&mut replies).await? {
            ServerMessage::Report(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            ServerMessage::Error { message } => log::warn!("report failed: {}", message),
            other => log::warn!("unexpected reply: {:?}", other),
        }
    }

    if args.export {
        protocol::send_to_sink(&mut sink, &ClientMessage::ExportReport).await?;
        match expect_reply(&mut replies).await? {
            ServerMessage::Exported { path } => log::info!("report exported to {}", path),
            ServerMessage::Error { message } => log::warn!("export failed: {}", message),
            other => log::warn!("unexpected reply: {:?}", other),
        }
    }

    reader_task.abort();
    Ok(())
}
