//! 링크 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 프레임 수신 신호 품질 기록
#[derive(Debug, Clone, Copy)]
struct SignalSample {
    rssi: i16,
    snr: f32,
}

/// 수신측 링크 통계
#[derive(Debug, Clone)]
pub struct LinkStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 최근 신호 품질 기록
    samples: VecDeque<SignalSample>,

    /// 윈도우 크기
    window_size: usize,

    /// 수신한 전체 프레임 수
    pub frames_received: u64,

    /// 최소 길이 미달로 버린 프레임 수
    pub frames_too_short: u64,

    /// CRC 불일치 프레임 수
    pub checksum_failures: u64,

    /// 정의되지 않은 타입 프레임 수
    pub unknown_type_frames: u64,

    pub acks_sent: u64,
    pub nacks_sent: u64,

    /// 응답 송신 실패 수
    pub reply_failures: u64,

    /// 송신 완료 이벤트 수
    pub tx_done: u64,

    /// 저장된 이미지 바이트
    pub image_bytes: u64,

    /// 저장된 이미지 프래그먼트 수
    pub image_fragments: u64,

    /// 같은 시퀀스가 연속으로 다시 저장된 횟수
    pub repeated_fragments: u64,

    /// 기록된 텔레메트리 줄 수
    pub telemetry_entries: u64,

    /// 파일/로그 저장 실패 수
    pub storage_failures: u64,

    pub previews_written: u64,
    pub preview_failures: u64,

    /// 완료된 세션 수
    pub sessions_completed: u64,
}

impl LinkStats {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            start_time: Instant::now(),
            samples: VecDeque::with_capacity(window_size),
            window_size,
            frames_received: 0,
            frames_too_short: 0,
            checksum_failures: 0,
            unknown_type_frames: 0,
            acks_sent: 0,
            nacks_sent: 0,
            reply_failures: 0,
            tx_done: 0,
            image_bytes: 0,
            image_fragments: 0,
            repeated_fragments: 0,
            telemetry_entries: 0,
            storage_failures: 0,
            previews_written: 0,
            preview_failures: 0,
            sessions_completed: 0,
        }
    }

    /// 신호 품질 기록
    pub fn record_signal(&mut self, rssi: i16, snr: f32) {
        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(SignalSample { rssi, snr });
    }

    /// 윈도우 평균 RSSI (dBm)
    pub fn average_rssi(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|s| s.rssi as i64).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    /// 윈도우 평균 SNR (dB)
    pub fn average_snr(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.snr as f64).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// 윈도우 최저 RSSI
    pub fn worst_rssi(&self) -> Option<i16> {
        self.samples.iter().map(|s| s.rssi).min()
    }

    /// 디코딩된 프레임 중 CRC 실패 비율
    pub fn checksum_failure_rate(&self) -> f64 {
        let decoded = self.frames_received.saturating_sub(self.frames_too_short);
        if decoded == 0 {
            return 0.0;
        }
        self.checksum_failures as f64 / decoded as f64
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 이미지 수신률 (bytes/sec)
    pub fn image_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.image_bytes as f64 / elapsed
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        *self = Self::new(self.window_size);
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.0}s | Frames: {} | ACK/NACK: {}/{} | CRC fail: {:.1}% | Image: {} B ({} frags, {} files, {:.1} B/s) | Telemetry: {} | RSSI: {} | SNR: {}",
            self.elapsed().as_secs_f64(),
            self.frames_received,
            self.acks_sent,
            self.nacks_sent,
            self.checksum_failure_rate() * 100.0,
            self.image_bytes,
            self.image_fragments,
            self.sessions_completed,
            self.image_throughput(),
            self.telemetry_entries,
            self.average_rssi()
                .map(|v| format!("{:.1} dBm", v))
                .unwrap_or_else(|| "-".to_string()),
            self.average_snr()
                .map(|v| format!("{:.1} dB", v))
                .unwrap_or_else(|| "-".to_string()),
        )
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new(100)
    }
}
