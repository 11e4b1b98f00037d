//! 파일 전송 세션 상태
//!
//! 세션은 파일 번호로 식별되며 `Empty → Receiving → Complete` 순서로만 진행한다.
//! 완료되면 번호가 증가하고 새 `Empty` 세션이 시작된다.

use std::time::{Duration, Instant};

use bytes::BytesMut;

/// 파일 번호 (1부터 증가)
pub type FileIndex = u32;

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 아직 프래그먼트 없음
    Empty,

    /// 프래그먼트 수신 중
    Receiving,

    /// 마지막 프래그먼트 수신 완료
    Complete,
}

/// 진행 중인 세션
#[derive(Debug)]
pub struct Session {
    /// 파일 번호
    pub index: FileIndex,

    pub state: SessionState,

    /// 프레임에 실려 온 마지막 시퀀스 번호 (`sequence_count`)
    pub expected_final: Option<u8>,

    /// 저장된 프래그먼트 수
    pub fragments: u32,

    /// 마지막으로 저장된 시퀀스 번호
    pub last_sequence: Option<u8>,

    /// 지금까지 저장된 바이트 (미리보기 디코딩용)
    data: BytesMut,

    /// 첫 프래그먼트 수신 시각
    started_at: Option<Instant>,
}

impl Session {
    pub fn new(index: FileIndex) -> Self {
        Self {
            index,
            state: SessionState::Empty,
            expected_final: None,
            fragments: 0,
            last_sequence: None,
            data: BytesMut::new(),
            started_at: None,
        }
    }

    /// 저장에 성공한 프래그먼트 반영
    pub fn record_fragment(&mut self, sequence: u8, sequence_count: u8, bytes: &[u8]) {
        if self.state == SessionState::Empty {
            self.state = SessionState::Receiving;
            self.started_at = Some(Instant::now());
        }

        self.data.extend_from_slice(bytes);
        self.expected_final = Some(sequence_count);
        self.last_sequence = Some(sequence);
        self.fragments += 1;
    }

    /// 직전에 저장한 시퀀스와 같은 번호인지 (ACK 유실 후 재전송 추정)
    pub fn is_repeat_of_last(&self, sequence: u8) -> bool {
        self.last_sequence == Some(sequence)
    }

    /// 누적 바이트
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_written(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// 세션 종료 (메모리 버퍼는 여기서 해제)
    fn close(self) -> CompletedSession {
        CompletedSession {
            index: self.index,
            state: SessionState::Complete,
            fragments: self.fragments,
            bytes_written: self.bytes_written(),
            expected_final: self.expected_final,
            elapsed: self.elapsed(),
        }
    }
}

/// 완료된 세션 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub index: FileIndex,
    pub state: SessionState,
    pub fragments: u32,
    pub bytes_written: u64,
    pub expected_final: Option<u8>,
    pub elapsed: Duration,
}

/// 현재 세션과 파일 번호 관리
///
/// 컨트롤러가 단독으로 소유한다.
#[derive(Debug)]
pub struct SessionTracker {
    current: Session,
    completed: u64,
}

impl SessionTracker {
    /// 1번 파일부터 시작
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(index: FileIndex) -> Self {
        Self {
            current: Session::new(index.max(1)),
            completed: 0,
        }
    }

    pub fn current(&self) -> &Session {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Session {
        &mut self.current
    }

    pub fn current_index(&self) -> FileIndex {
        self.current.index
    }

    /// 이번 프로세스에서 완료된 세션 수
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// 현재 세션을 닫고 다음 번호의 빈 세션 시작
    pub fn complete_current(&mut self) -> CompletedSession {
        let next = Session::new(self.current.index.wrapping_add(1).max(1));
        let finished = std::mem::replace(&mut self.current, next);
        self.completed += 1;
        finished.close()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.current_index(), 1);
        assert_eq!(tracker.current().state, SessionState::Empty);

        tracker.current_mut().record_fragment(1, 2, b"abc");
        assert_eq!(tracker.current().state, SessionState::Receiving);
        tracker.current_mut().record_fragment(2, 2, b"de");
        assert_eq!(tracker.current().data(), b"abcde");

        let done = tracker.complete_current();
        assert_eq!(done.index, 1);
        assert_eq!(done.state, SessionState::Complete);
        assert_eq!(done.fragments, 2);
        assert_eq!(done.bytes_written, 5);
        assert_eq!(done.expected_final, Some(2));

        assert_eq!(tracker.current_index(), 2);
        assert_eq!(tracker.current().state, SessionState::Empty);
        assert!(tracker.current().data().is_empty());
        assert_eq!(tracker.completed_count(), 1);
    }

    #[test]
    fn test_complete_empty_session_still_advances() {
        let mut tracker = SessionTracker::starting_at(7);
        let done = tracker.complete_current();
        assert_eq!(done.fragments, 0);
        assert_eq!(tracker.current_index(), 8);
    }

    #[test]
    fn test_repeat_detection() {
        let mut session = Session::new(1);
        assert!(!session.is_repeat_of_last(1));
        session.record_fragment(1, 3, b"x");
        assert!(session.is_repeat_of_last(1));
        assert!(!session.is_repeat_of_last(2));
    }

    #[test]
    fn test_index_never_zero() {
        assert_eq!(SessionTracker::starting_at(0).current_index(), 1);
    }
}
