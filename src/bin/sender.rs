//! LRFT 송신기
//!
//! 파일(또는 텔레메트리 메시지)을 프레임으로 나눠 stop-and-wait로 전송한다.
//! 불안정한 무선 링크를 흉내 내기 위해 손실/손상을 주입할 수 있다.
//!
//! 사용법:
//!   cargo run --release --bin lrft-sender -- [OPTIONS] (--file <PATH> | --message <TEXT>)
//!
//! 예시:
//!   # 이미지 전송
//!   cargo run --release --bin lrft-sender -- --target 127.0.0.1:9100 --file photo.webp
//!
//!   # 텔레메트리 + 20% 손실 시뮬레이션
//!   cargo run --release --bin lrft-sender -- -m "alt=1200m temp=-3C" --drop-rate 0.2

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{ArgGroup, Parser};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lrft::{Config, Fragmenter, Frame, Reply, RxEvent, SendAction, StopAndWait};

#[derive(Parser)]
#[command(name = "lrft-sender")]
#[command(about = "LRFT sender - stop-and-wait file/telemetry transfer")]
#[command(version)]
#[command(group(ArgGroup::new("input").required(true).args(["file", "message"])))]
struct Cli {
    /// Receiver address
    #[arg(short, long, default_value = "127.0.0.1:9100")]
    target: SocketAddr,

    /// Local bind address
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// File to send as image fragments
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Telemetry text to send as a single frame
    #[arg(short, long)]
    message: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Payload bytes per fragment
    #[arg(long)]
    payload_size: Option<usize>,

    /// ACK timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retransmissions per frame before giving up
    #[arg(long)]
    retries: Option<u32>,

    /// Simulated probability of losing a frame (0.0 ~ 1.0)
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Simulated probability of corrupting a frame byte (0.0 ~ 1.0)
    #[arg(long, default_value_t = 0.0)]
    corrupt_rate: f64,

    /// RSSI reported to the receiver (dBm)
    #[arg(long, default_value_t = -90, allow_hyphen_values = true)]
    rssi: i16,

    /// SNR reported to the receiver (dB)
    #[arg(long, default_value_t = 7.5, allow_hyphen_values = true)]
    snr: f32,

    /// Seed for the loss simulation
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// 손실/손상 주입 링크
struct LossyLink {
    rng: StdRng,
    drop_rate: f64,
    corrupt_rate: f64,
}

impl LossyLink {
    /// 보낼 바이트 반환 (None이면 유실)
    fn transmit(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        if self.rng.gen_bool(self.drop_rate) {
            debug!("시뮬레이션: seq {} 유실", frame.sequence);
            return None;
        }

        let mut wire = frame.as_bytes().to_vec();
        if self.rng.gen_bool(self.corrupt_rate) {
            let idx = self.rng.gen_range(0..wire.len());
            wire[idx] ^= 0x5A;
            debug!("시뮬레이션: seq {} byte {} 손상", frame.sequence, idx);
        }
        Some(wire)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(size) = cli.payload_size {
        config.max_payload_len = size;
    }
    if let Some(ms) = cli.timeout_ms {
        config.ack_timeout_ms = ms;
    }
    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    config.validate()?;

    let fragmenter = Fragmenter::new(config.max_payload_len);
    let frames = match (&cli.file, &cli.message) {
        (Some(path), _) => {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            info!("Loading file: {} ({} bytes)", path.display(), data.len());
            fragmenter.fragment(&data)?
        }
        (None, Some(text)) => vec![fragmenter.telemetry(0, text)?],
        (None, None) => anyhow::bail!("either --file or --message is required"),
    };

    let total_frames = frames.len();
    info!("LRFT Sender starting...");
    info!("Target: {}", cli.target);
    info!("Frames: {} (max payload {} bytes)", total_frames, fragmenter.max_payload());

    let socket = UdpSocket::bind(cli.bind).await?;
    let timeout = Duration::from_millis(config.ack_timeout_ms);
    let mut link = LossyLink {
        rng: match cli.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        },
        drop_rate: cli.drop_rate.clamp(0.0, 1.0),
        corrupt_rate: cli.corrupt_rate.clamp(0.0, 1.0),
    };

    let mut saw = StopAndWait::new(frames, config.max_retries);
    let mut buf = [0u8; 64];
    let start = Instant::now();

    while let Some(frame) = saw.current().cloned() {
        saw.mark_sent();
        if let Some(wire) = link.transmit(&frame) {
            let event = RxEvent::new(wire, cli.rssi, cli.snr);
            socket.send_to(&event.to_envelope(), cli.target).await?;
        }

        // 현재 프레임에 대한 응답 또는 타임아웃까지 대기
        let action = loop {
            match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, _addr))) => match Reply::decode(&buf[..len]) {
                    Ok(reply) => match saw.on_reply(reply)? {
                        SendAction::Ignore => continue,
                        action => break action,
                    },
                    Err(e) => {
                        warn!("응답 파싱 실패: {}", e);
                        continue;
                    }
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("ACK 타임아웃: seq {}", frame.sequence);
                    break saw.on_timeout()?;
                }
            }
        };

        if action == SendAction::Advance {
            let (done, total) = saw.progress();
            info!(
                "Progress: {}/{} ({:.1}%)",
                done,
                total,
                done as f64 / total as f64 * 100.0
            );
        }
    }

    let stats = saw.stats();
    info!("Transfer complete!");
    info!("  Time: {:.2}s", start.elapsed().as_secs_f64());
    info!("  Frames: {} sent, {} retransmitted", stats.frames_sent, stats.retransmissions);
    info!("  Replies: {} ACK, {} NACK, {} timeouts", stats.acks, stats.nacks, stats.timeouts);
    Ok(())
}
