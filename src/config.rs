//! 프로토콜 설정

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_MAX_PAYLOAD_LEN};

/// 마지막 프래그먼트 수신 시 세션 완료 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// `sequence == sequence_count`이면 CRC 결과와 무관하게 완료 (기존 수신기 동작)
    #[default]
    OnTerminalSequence,

    /// 마지막 프래그먼트가 검증되고 저장된 경우에만 완료
    RequireValidFragment,
}

/// LRFT 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 수신 파일, 미리보기, 텔레메트리 로그 저장 디렉토리
    pub data_dir: PathBuf,

    /// 수신 파일 확장자 (`<index>.<ext>`)
    pub image_extension: String,

    /// 미리보기 파일 접미사 (`<index><suffix>.webp`)
    pub preview_suffix: String,

    /// 미리보기 인코딩 품질 (0 ~ 100)
    pub preview_quality: f32,

    /// 프래그먼트마다 미리보기 재생성
    pub preview_enabled: bool,

    /// 텔레메트리 로그 파일 이름
    pub telemetry_file: String,

    pub completion_policy: CompletionPolicy,

    /// 재시작 시 기존 파일 다음 번호부터 시작
    /// false면 항상 1부터 (기존 파일에 이어 붙음)
    pub resume_file_index: bool,

    /// RSSI/SNR 통계 윈도우 (프레임 수)
    pub stats_window_size: usize,

    /// 통계 로그 주기 (밀리초, 0이면 비활성)
    pub stats_log_interval_ms: u64,

    /// 송신측 프래그먼트당 최대 payload (바이트)
    pub max_payload_len: usize,

    /// 송신측 ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 송신측 프레임당 최대 재전송 횟수
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            image_extension: "webp".to_string(),
            preview_suffix: "_preview".to_string(),
            preview_quality: 75.0,
            preview_enabled: true,
            telemetry_file: "telemetry.txt".to_string(),
            completion_policy: CompletionPolicy::OnTerminalSequence,
            resume_file_index: true,
            stats_window_size: 100,
            stats_log_interval_ms: 30_000,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            ack_timeout_ms: 2_000,
            max_retries: 8,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장 디렉토리만 바꾼 기본 설정
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// 저사양 게이트웨이용 설정 (미리보기 비활성)
    pub fn headless() -> Self {
        Self {
            preview_enabled: false,
            stats_log_interval_ms: 60_000,
            ..Self::default()
        }
    }

    /// 불안정한 링크용 설정
    pub fn unstable_link() -> Self {
        Self {
            completion_policy: CompletionPolicy::RequireValidFragment,
            max_payload_len: 128,
            ack_timeout_ms: 4_000,
            max_retries: 20,
            ..Self::default()
        }
    }

    /// TOML 파일에서 로드
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::StorageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.preview_quality) {
            return Err(Error::Config(format!(
                "preview_quality must be within 0..=100, got {}",
                self.preview_quality
            )));
        }
        if self.max_payload_len == 0 || self.max_payload_len > DEFAULT_MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "max_payload_len must be within 1..={}, got {}",
                DEFAULT_MAX_PAYLOAD_LEN, self.max_payload_len
            )));
        }
        if self.image_extension.is_empty() || self.telemetry_file.is_empty() {
            return Err(Error::Config(
                "image_extension and telemetry_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 텔레메트리 로그 경로
    pub fn telemetry_path(&self) -> PathBuf {
        self.data_dir.join(&self.telemetry_file)
    }
}
