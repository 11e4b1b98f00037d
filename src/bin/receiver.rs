//! LRFT 수신기 (지상국)
//!
//! UDP 데이터그램을 무선 패킷 대신 받아 프레임을 처리하고 ACK/NACK를 돌려준다.
//! - 이미지 프래그먼트 → `data/<n>.webp` + `data/<n>_preview.webp`
//! - 텔레메트리 → `data/telemetry.txt`
//!
//! 사용법:
//!   cargo run --release --bin lrft-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin lrft-receiver -- --bind 0.0.0.0:9100
//!
//!   # 설정 파일 + 미리보기 비활성
//!   cargo run --release --bin lrft-receiver -- -c lrft.toml --no-preview

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lrft::radio::forward_datagrams;
use lrft::{Config, Controller, LinkStats, RxEvent, UdpRadio};

#[derive(Parser)]
#[command(name = "lrft-receiver")]
#[command(about = "LRFT receiver - reassembles radio fragments and replies with ACK/NACK")]
#[command(version)]
struct Cli {
    /// Address standing in for the radio receiver
    #[arg(short, long, default_value = "0.0.0.0:9100")]
    bind: SocketAddr,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Disable preview generation
    #[arg(long)]
    no_preview: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.no_preview {
        config.preview_enabled = false;
    }

    if cli.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    info!("LRFT Receiver starting...");
    info!("Data directory: {}", config.data_dir.display());
    info!("Completion policy: {:?}", config.completion_policy);
    info!(
        "Preview: {}",
        if config.preview_enabled {
            format!("on (quality {})", config.preview_quality)
        } else {
            "off".to_string()
        }
    );

    let mut controller = Controller::from_config(config.clone())?;
    let mut radio = UdpRadio::bind(cli.bind).await?;
    info!("Receiver listening on {}", radio.local_addr()?);

    // ─────────────────────────────────────────────────────────────────
    // 수신 태스크: 데이터그램 → 처리 큐
    // ─────────────────────────────────────────────────────────────────
    let (frame_tx, mut frame_rx) = mpsc::channel::<(RxEvent, SocketAddr)>(1000);
    tokio::spawn(forward_datagrams(radio.socket(), frame_tx));

    // ─────────────────────────────────────────────────────────────────
    // 통계 로그 태스크
    // ─────────────────────────────────────────────────────────────────
    let stats = Arc::new(RwLock::new(LinkStats::new(config.stats_window_size)));
    if config.stats_log_interval_ms > 0 {
        let stats_log = stats.clone();
        let interval = Duration::from_millis(config.stats_log_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("{}", stats_log.read().summary());
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────
    // 처리 루프: 컨트롤러 단독 소유 (프레임 하나씩 끝까지 처리)
    // ─────────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            received = frame_rx.recv() => {
                let Some((event, addr)) = received else {
                    break;
                };
                radio.set_peer(addr);
                let failures_before = controller.stats().reply_failures;
                let outcome = controller.handle_rx(&event, &mut radio);
                if outcome.reply.is_some() && controller.stats().reply_failures == failures_before {
                    controller.on_tx_done();
                }
                *stats.write() = controller.stats().clone();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    info!("Final stats: {}", controller.stats().summary());
    Ok(())
}
