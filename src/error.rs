//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// LRFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프레임이 너무 짧음: {len} bytes (최소 {min} bytes)")]
    FrameTooShort { len: usize, min: usize },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("저장소 열기 실패: {}: {source}", .path.display())]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("미리보기 디코딩 실패: {0}")]
    DecodeFailure(String),

    #[error("미리보기 인코딩 실패: {0}")]
    Encode(String),

    #[error("알 수 없는 프레임 타입: {0}")]
    UnrecognizedType(u8),

    #[error("유효하지 않은 응답 프레임: {0:02X?}")]
    InvalidReply(Vec<u8>),

    #[error("프래그먼트 수 초과: {count}개 (최대 {max}개)")]
    TooManyFragments { count: usize, max: usize },

    #[error("전송할 데이터 없음")]
    EmptyPayload,

    #[error("재전송 한도 초과: sequence={sequence}, attempts={attempts}")]
    RetriesExhausted { sequence: u8, attempts: u32 },

    #[error("설정 에러: {0}")]
    Config(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
