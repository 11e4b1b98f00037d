//! # LRFT (LoRa Reliable File Transfer)
//!
//! 작은 payload의 불안정한 무선 링크 위에서 동작하는 파일/텔레메트리 전송 프로토콜
//!
//! ## 핵심 특징
//! - **stop-and-wait**: 프레임마다 ACK/NACK, 재전송은 송신측이 결정
//! - **CRC-32 검증**: 프레임 끝 4바이트 (zlib 호환)
//! - **파일 재조립**: 검증된 프래그먼트를 도착 순서대로 파일에 추가
//! - **텔레메트리**: 짧은 텍스트를 append-only 로그에 기록
//! - **점진적 미리보기**: 일부만 받은 WebP도 디코딩해 미리보기 생성

pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod integrity;
pub mod preview;
pub mod radio;
pub mod reassembler;
pub mod sender;
pub mod session;
pub mod stats;
pub mod telemetry;
pub mod webp;

pub use config::{CompletionPolicy, Config};
pub use controller::{Controller, Delivery, FrameOutcome};
pub use error::{Error, Result};
pub use frame::{build_ack, Frame, FrameType, Reply, ReplyKind};
pub use preview::{DecodeOutcome, PreviewGenerator, PreviewStatus, RgbaImage};
pub use radio::{MemoryRadio, RadioLink, RxEvent, UdpRadio};
pub use reassembler::FileReassembler;
pub use sender::{Fragmenter, SendAction, StopAndWait};
pub use session::{CompletedSession, FileIndex, Session, SessionState, SessionTracker};
pub use stats::LinkStats;
pub use telemetry::TelemetrySink;

/// 프레임 헤더 길이 (type, sequence, sequence_count)
pub const HEADER_LEN: usize = 3;

/// CRC 길이
pub const CHECKSUM_LEN: usize = 4;

/// 최소 유효 프레임 길이
pub const MIN_FRAME_LEN: usize = 6;

/// 무선 패킷 최대 길이 (SX127x FIFO)
pub const MAX_FRAME_LEN: usize = 255;

/// 프래그먼트당 기본 최대 payload
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN - CHECKSUM_LEN;

/// 파일당 최대 프래그먼트 수 (시퀀스 1..=255)
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// 응답 프레임 길이
pub const REPLY_LEN: usize = 2;

/// ACK 마커
pub const ACK_MARKER: u8 = 0xAA;

/// NACK 마커
pub const NACK_MARKER: u8 = 0xFF;
