//! 송신자
//!
//! - 파일을 번호 붙은 프레임으로 분할 (시퀀스 1..=N, sequence_count = N)
//! - stop-and-wait: 프레임 하나 보내고 ACK를 기다림
//! - NACK 또는 타임아웃이면 같은 프레임 재전송

use tracing::{debug, warn};

use crate::frame::{Frame, FrameType, Reply, ReplyKind};
use crate::{Error, Result, DEFAULT_MAX_PAYLOAD_LEN, MAX_FRAGMENTS};

/// 파일 분할기
#[derive(Debug, Clone)]
pub struct Fragmenter {
    max_payload: usize,
}

impl Fragmenter {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.clamp(1, DEFAULT_MAX_PAYLOAD_LEN),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 데이터를 이미지 프레임들로 분할
    pub fn fragment(&self, data: &[u8]) -> Result<Vec<Frame>> {
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let count = data.len().div_ceil(self.max_payload);
        if count > MAX_FRAGMENTS {
            return Err(Error::TooManyFragments {
                count,
                max: MAX_FRAGMENTS,
            });
        }

        let sequence_count = count as u8;
        Ok(data
            .chunks(self.max_payload)
            .enumerate()
            .map(|(idx, chunk)| {
                Frame::new(FrameType::ImageData, (idx + 1) as u8, sequence_count, chunk)
            })
            .collect())
    }

    /// 텔레메트리 프레임 (한 프레임에 들어가야 함)
    pub fn telemetry(&self, sequence: u8, text: &str) -> Result<Frame> {
        if text.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if text.len() > self.max_payload {
            let count = text.len().div_ceil(self.max_payload);
            return Err(Error::TooManyFragments { count, max: 1 });
        }
        Ok(Frame::new(FrameType::Telemetry, sequence, 0, text.as_bytes()))
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

/// 응답 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAction {
    /// 다음 프레임으로 진행 (또는 완료)
    Advance,

    /// 현재 프레임 재전송
    Retransmit,

    /// 현재 프레임과 관계없는 응답
    Ignore,
}

/// 송신 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub acks: u64,
    pub nacks: u64,
    pub timeouts: u64,
    pub ignored_replies: u64,
}

/// stop-and-wait 송신 상태
#[derive(Debug)]
pub struct StopAndWait {
    frames: Vec<Frame>,
    next: usize,

    /// 현재 프레임 전송 횟수
    attempts: u32,
    max_retries: u32,
    stats: SenderStats,
}

impl StopAndWait {
    pub fn new(frames: Vec<Frame>, max_retries: u32) -> Self {
        Self {
            frames,
            next: 0,
            attempts: 0,
            max_retries,
            stats: SenderStats::default(),
        }
    }

    /// 지금 보내야 할 프레임
    pub fn current(&self) -> Option<&Frame> {
        self.frames.get(self.next)
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.frames.len()
    }

    /// (확인된 프레임 수, 전체 프레임 수)
    pub fn progress(&self) -> (usize, usize) {
        (self.next.min(self.frames.len()), self.frames.len())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// 현재 프레임을 보냈음을 기록
    pub fn mark_sent(&mut self) {
        if self.attempts > 0 {
            self.stats.retransmissions += 1;
        }
        self.attempts += 1;
        self.stats.frames_sent += 1;
    }

    /// 응답 처리
    pub fn on_reply(&mut self, reply: Reply) -> Result<SendAction> {
        let Some(frame) = self.current() else {
            self.stats.ignored_replies += 1;
            return Ok(SendAction::Ignore);
        };

        let (sequence, expected) = (frame.sequence, frame.reply_sequence());
        if reply.sequence != expected {
            debug!(
                "응답 무시: seq {} (기대값 {})",
                reply.sequence, expected
            );
            self.stats.ignored_replies += 1;
            return Ok(SendAction::Ignore);
        }

        match reply.kind {
            ReplyKind::Ack => {
                self.stats.acks += 1;
                self.next += 1;
                self.attempts = 0;
                Ok(SendAction::Advance)
            }
            ReplyKind::Nack => {
                self.stats.nacks += 1;
                warn!("NACK 수신: seq {} (시도 {})", sequence, self.attempts);
                self.retry()
            }
        }
    }

    /// ACK 대기 타임아웃
    pub fn on_timeout(&mut self) -> Result<SendAction> {
        if self.is_done() {
            return Ok(SendAction::Ignore);
        }
        self.stats.timeouts += 1;
        self.retry()
    }

    fn retry(&mut self) -> Result<SendAction> {
        if self.attempts > self.max_retries {
            let sequence = self.current().map(|f| f.sequence).unwrap_or_default();
            return Err(Error::RetriesExhausted {
                sequence,
                attempts: self.attempts,
            });
        }
        Ok(SendAction::Retransmit)
    }
}
