//! 수신 프로토콜 컨트롤러
//!
//! 수신 프레임마다:
//! 1. 프레임 디코딩 (너무 짧으면 응답 없이 버림)
//! 2. CRC 검증
//! 3. 타입별 처리 (0: 이미지 프래그먼트, 1: 텔레메트리, 그 외: 거부)
//! 4. `sequence + 1`을 담은 ACK/NACK 응답
//! 5. 이미지 프래그먼트의 `sequence == sequence_count`면 세션 완료
//!
//! 컨트롤러는 재진입하지 않는다. 동시 런타임에서는 단일 소비자 태스크가 소유해야 한다.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::{CompletionPolicy, Config};
use crate::frame::{Frame, FrameType, Reply};
use crate::preview::{PreviewGenerator, PreviewStatus};
use crate::radio::{RadioLink, RxEvent};
use crate::reassembler::FileReassembler;
use crate::session::{CompletedSession, FileIndex, Session, SessionTracker};
use crate::stats::LinkStats;
use crate::telemetry::TelemetrySink;
use crate::{Error, Result};

/// 검증된 프레임이 전달된 곳
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 세션 파일에 추가됨
    Fragment {
        session: FileIndex,
        appended: usize,
        total: u64,

        /// 직전 프래그먼트와 같은 시퀀스 (재전송 추정, 그래도 추가됨)
        repeated: bool,
    },

    /// 텔레메트리 로그에 기록됨
    Telemetry { text: String },
}

/// 프레임 하나의 처리 결과
#[derive(Debug)]
pub struct FrameOutcome {
    /// 디코딩된 프레임 타입 (너무 짧으면 None)
    pub frame_type: Option<FrameType>,

    /// 보낸 (또는 보내려 한) 응답. 너무 짧은 프레임은 None
    pub reply: Option<Reply>,

    /// 처리 결과
    pub delivery: Result<Delivery>,

    /// 이번 프레임에서 시도한 미리보기 갱신
    pub preview: Option<Result<PreviewStatus>>,

    /// 이번 프레임으로 완료된 세션
    pub completed: Option<CompletedSession>,
}

impl FrameOutcome {
    fn dropped(err: Error) -> Self {
        Self {
            frame_type: None,
            reply: None,
            delivery: Err(err),
            preview: None,
            completed: None,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.reply.map(|r| r.is_ack()).unwrap_or(false)
    }
}

/// 수신 컨트롤러
#[derive(Debug)]
pub struct Controller {
    config: Config,
    sessions: SessionTracker,
    reassembler: FileReassembler,
    telemetry: TelemetrySink,
    preview: Option<PreviewGenerator>,
    stats: LinkStats,
}

impl Controller {
    /// 설정대로 생성 (미리보기가 켜져 있으면 libwebp 코덱 사용)
    pub fn from_config(config: Config) -> Result<Self> {
        let preview = config
            .preview_enabled
            .then(|| PreviewGenerator::webp(config.preview_quality));
        Self::new(config, preview)
    }

    /// 미리보기 생성기를 직접 지정해 생성
    pub fn new(config: Config, preview: Option<PreviewGenerator>) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).map_err(|source| Error::StorageOpen {
            path: config.data_dir.clone(),
            source,
        })?;

        let reassembler = FileReassembler::new(&config.data_dir, &config.image_extension);
        let first_index = if config.resume_file_index {
            reassembler
                .highest_existing_index()?
                .map(|highest| highest.saturating_add(1))
                .unwrap_or(1)
        } else {
            1
        };

        info!(
            "수신 컨트롤러 시작: dir={}, 첫 파일 번호={}, 미리보기={}",
            config.data_dir.display(),
            first_index,
            if preview.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            telemetry: TelemetrySink::new(config.telemetry_path()),
            stats: LinkStats::new(config.stats_window_size),
            sessions: SessionTracker::starting_at(first_index),
            reassembler,
            preview,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn current_session(&self) -> &Session {
        self.sessions.current()
    }

    /// 세션 파일 경로
    pub fn session_path(&self, index: FileIndex) -> PathBuf {
        self.reassembler.session_path(index)
    }

    /// 미리보기 파일 경로 (미리보기 비활성이면 None)
    pub fn preview_path(&self, index: FileIndex) -> Option<PathBuf> {
        self.preview.as_ref().map(|generator| {
            self.reassembler
                .preview_path(index, &self.config.preview_suffix, generator.extension())
        })
    }

    /// 수신 이벤트 처리
    pub fn handle_rx<L: RadioLink + ?Sized>(
        &mut self,
        event: &RxEvent,
        radio: &mut L,
    ) -> FrameOutcome {
        self.stats.frames_received += 1;
        self.stats.record_signal(event.rssi, event.snr);

        let frame = match Frame::decode(event.payload.clone()) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.frames_too_short += 1;
                warn!("프레임 폐기: {}", e);
                return FrameOutcome::dropped(e);
            }
        };

        let checksum = frame.check();
        if checksum.is_err() {
            self.stats.checksum_failures += 1;
        }

        info!(
            "Rx: type {} | seq {}/{} | {} B | CRC {} | RSSI {} dBm | SNR {:.1} dB",
            frame.frame_type.as_byte(),
            frame.sequence,
            frame.sequence_count,
            frame.payload.len(),
            if checksum.is_ok() { "OK" } else { "FAIL" },
            event.rssi,
            event.snr
        );

        let mut preview = None;
        let (delivery, ack) = match frame.frame_type {
            FrameType::ImageData => match checksum {
                Ok(()) => {
                    let delivery = self.store_fragment(&frame);
                    if delivery.is_ok() {
                        preview = self.regenerate_preview();
                    }
                    let stored = delivery.is_ok();
                    (delivery, stored)
                }
                Err(e) => {
                    warn!("CRC 불일치: 이미지 프래그먼트 seq {} 폐기", frame.sequence);
                    (Err(e), false)
                }
            },
            FrameType::Telemetry => match checksum {
                // 저장 실패해도 ACK (항목은 유실, 재시도 없음)
                Ok(()) => (self.store_telemetry(&frame), true),
                Err(e) => {
                    warn!("CRC 불일치: 텔레메트리 폐기");
                    (Err(e), false)
                }
            },
            FrameType::Unknown(t) => {
                self.stats.unknown_type_frames += 1;
                warn!("정의되지 않은 프레임 타입 {}: 거부 (NACK)", t);
                (Err(Error::UnrecognizedType(t)), false)
            }
        };

        let reply = self.send_reply(&frame, ack, radio);

        let completed = if frame.frame_type == FrameType::ImageData && frame.is_terminal() {
            self.complete_session(&frame, delivery.is_ok(), &mut preview)
        } else {
            None
        };

        FrameOutcome {
            frame_type: Some(frame.frame_type),
            reply: Some(reply),
            delivery,
            preview,
            completed,
        }
    }

    /// 송신 완료 이벤트
    pub fn on_tx_done(&mut self) {
        self.stats.tx_done += 1;
        debug!("Tx done");
    }

    fn store_fragment(&mut self, frame: &Frame) -> Result<Delivery> {
        let session = self.sessions.current_mut();
        let repeated = session.is_repeat_of_last(frame.sequence);

        if let Err(e) = self.reassembler.append(
            session,
            frame.sequence,
            frame.sequence_count,
            &frame.payload,
        ) {
            self.stats.storage_failures += 1;
            warn!(
                "파일 {} 저장 실패, seq {} 폐기: {}",
                session.index, frame.sequence, e
            );
            return Err(e);
        }

        if repeated {
            self.stats.repeated_fragments += 1;
            warn!(
                "파일 {}: seq {} 연속 수신 (ACK 유실 후 재전송 추정), 중복 추가됨",
                session.index, frame.sequence
            );
        }
        self.stats.image_fragments += 1;
        self.stats.image_bytes += frame.payload.len() as u64;

        Ok(Delivery::Fragment {
            session: session.index,
            appended: frame.payload.len(),
            total: session.bytes_written(),
            repeated,
        })
    }

    fn store_telemetry(&mut self, frame: &Frame) -> Result<Delivery> {
        let text = TelemetrySink::decode_text(&frame.payload);
        info!("텔레메트리 수신: {}", text);

        match self.telemetry.append(&text) {
            Ok(()) => {
                self.stats.telemetry_entries += 1;
                Ok(Delivery::Telemetry { text })
            }
            Err(e) => {
                self.stats.storage_failures += 1;
                warn!("텔레메트리 기록 실패, 항목 유실: {}", e);
                Err(e)
            }
        }
    }

    fn send_reply<L: RadioLink + ?Sized>(
        &mut self,
        frame: &Frame,
        ack: bool,
        radio: &mut L,
    ) -> Reply {
        let sequence = frame.reply_sequence();
        let reply = if ack {
            Reply::ack(sequence)
        } else {
            Reply::nack(sequence)
        };

        match radio.send(&reply.to_bytes()) {
            Ok(()) => {
                if ack {
                    self.stats.acks_sent += 1;
                } else {
                    self.stats.nacks_sent += 1;
                }
                debug!("→ {} 전송: seq {}", if ack { "ACK" } else { "NACK" }, sequence);
            }
            Err(e) => {
                self.stats.reply_failures += 1;
                warn!("응답 전송 실패 (seq {}): {}", sequence, e);
            }
        }
        reply
    }

    /// 마지막 프래그먼트 처리
    fn complete_session(
        &mut self,
        frame: &Frame,
        stored: bool,
        preview: &mut Option<Result<PreviewStatus>>,
    ) -> Option<CompletedSession> {
        let index = self.sessions.current_index();

        if !stored && self.config.completion_policy == CompletionPolicy::RequireValidFragment {
            warn!(
                "파일 {}: 마지막 프래그먼트 seq {} 미저장, 세션 유지",
                index, frame.sequence
            );
            return None;
        }
        if !stored {
            warn!(
                "파일 {}: 마지막 프래그먼트 seq {} 미저장 상태로 완료 처리",
                index, frame.sequence
            );
        }

        // 이번 프레임에서 이미 갱신했으면 생략
        if preview.is_none() {
            *preview = self.regenerate_preview();
        }

        let done = self.sessions.complete_current();
        self.stats.sessions_completed += 1;
        info!(
            "파일 {} 수신 완료: {} bytes, {} fragments, {:.1}s → 다음 파일 번호 {}",
            done.index,
            done.bytes_written,
            done.fragments,
            done.elapsed.as_secs_f64(),
            self.sessions.current_index()
        );
        Some(done)
    }

    fn regenerate_preview(&mut self) -> Option<Result<PreviewStatus>> {
        let generator = self.preview.as_ref()?;
        let session = self.sessions.current();
        if session.data().is_empty() {
            return None;
        }

        let path = self.reassembler.preview_path(
            session.index,
            &self.config.preview_suffix,
            generator.extension(),
        );
        let result = generator.update(session.data(), &path);

        match &result {
            Ok(PreviewStatus::Written {
                path,
                width,
                height,
                partial,
                ..
            }) => {
                self.stats.previews_written += 1;
                info!(
                    "미리보기 저장: {} ({}x{}, {})",
                    path.display(),
                    width,
                    height,
                    if *partial { "partial" } else { "complete" }
                );
            }
            Ok(PreviewStatus::NoImageYet) => {
                debug!("미리보기: 아직 디코딩할 데이터 부족 ({} bytes)", session.bytes_written());
            }
            Err(e) => {
                self.stats.preview_failures += 1;
                warn!("미리보기 생성 실패: {}", e);
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::frame::ReplyKind;
    use crate::preview::testing::fake_generator;
    use crate::radio::MemoryRadio;

    fn event(frame: &Frame) -> RxEvent {
        RxEvent::new(frame.encode(), -95, 7.5)
    }

    fn corrupted(frame: &Frame) -> RxEvent {
        let mut raw = frame.as_bytes().to_vec();
        raw[3] ^= 0xFF;
        RxEvent::new(raw, -110, -4.0)
    }

    fn controller(dir: &std::path::Path) -> Controller {
        Controller::new(Config::with_data_dir(dir), Some(fake_generator(4, 12))).unwrap()
    }

    #[test]
    fn test_short_frame_no_reply_no_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        for len in 0..6 {
            let outcome = ctrl.handle_rx(&RxEvent::new(vec![0u8; len], -90, 1.0), &mut radio);
            assert!(matches!(outcome.delivery, Err(Error::FrameTooShort { .. })));
            assert!(outcome.reply.is_none());
        }

        assert!(radio.sent.is_empty());
        assert!(!ctrl.session_path(1).exists());
        assert_eq!(ctrl.stats().frames_too_short, 6);
    }

    #[test]
    fn test_valid_fragment_appended_and_acked() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let frame = Frame::new(FrameType::ImageData, 1, 3, b"RIFF");
        let outcome = ctrl.handle_rx(&event(&frame), &mut radio);

        assert_eq!(outcome.reply, Some(Reply::ack(2)));
        assert_eq!(radio.sent, vec![vec![2u8, 0xAA]]);
        assert_eq!(
            outcome.delivery.unwrap(),
            Delivery::Fragment {
                session: 1,
                appended: 4,
                total: 4,
                repeated: false
            }
        );
        assert_eq!(fs::read(ctrl.session_path(1)).unwrap(), b"RIFF");
        assert!(outcome.completed.is_none());
    }

    #[test]
    fn test_corrupted_fragment_nacked_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let frame = Frame::new(FrameType::ImageData, 1, 3, b"RIFF");
        let outcome = ctrl.handle_rx(&corrupted(&frame), &mut radio);

        assert_eq!(radio.sent, vec![vec![2u8, 0xFF]]);
        assert_eq!(outcome.reply.map(|r| r.kind), Some(ReplyKind::Nack));
        assert!(matches!(outcome.delivery, Err(Error::ChecksumMismatch { .. })));
        assert!(outcome.preview.is_none());
        assert!(!ctrl.session_path(1).exists());
        assert_eq!(ctrl.stats().checksum_failures, 1);
    }

    #[test]
    fn test_replay_appends_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let frame = Frame::new(FrameType::ImageData, 1, 3, b"abc");
        ctrl.handle_rx(&event(&frame), &mut radio);
        let outcome = ctrl.handle_rx(&event(&frame), &mut radio);

        assert!(matches!(
            outcome.delivery,
            Ok(Delivery::Fragment { repeated: true, total: 6, .. })
        ));
        assert_eq!(fs::read(ctrl.session_path(1)).unwrap(), b"abcabc");
        assert_eq!(radio.sent, vec![vec![2u8, 0xAA], vec![2u8, 0xAA]]);
        assert_eq!(ctrl.stats().repeated_fragments, 1);
    }

    #[test]
    fn test_preview_regenerated_from_partial_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        // 3바이트: 디코더 기준 미달
        let first = ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 4, b"abc")), &mut radio);
        assert!(matches!(first.preview, Some(Ok(PreviewStatus::NoImageYet))));

        // 6바이트: 부분 디코딩
        let second = ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 2, 4, b"def")), &mut radio);
        assert!(matches!(
            second.preview,
            Some(Ok(PreviewStatus::Written { partial: true, .. }))
        ));
        assert!(ctrl.preview_path(1).unwrap().exists());
        assert_eq!(ctrl.preview_path(1).unwrap(), dir.path().join("1_preview.raw"));
    }

    #[test]
    fn test_preview_failure_does_not_affect_reassembly() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let outcome = ctrl.handle_rx(
            &event(&Frame::new(FrameType::ImageData, 1, 2, &[0xEE; 8])),
            &mut radio,
        );
        assert!(matches!(outcome.preview, Some(Err(Error::DecodeFailure(_)))));
        assert!(outcome.is_ack());
        assert_eq!(fs::read(ctrl.session_path(1)).unwrap(), vec![0xEE; 8]);
        assert_eq!(ctrl.stats().preview_failures, 1);
    }

    #[test]
    fn test_corrupt_terminal_still_completes_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 2, b"part-one")), &mut radio);
        let outcome = ctrl.handle_rx(
            &corrupted(&Frame::new(FrameType::ImageData, 2, 2, b"part-two")),
            &mut radio,
        );

        assert!(!outcome.is_ack());
        let done = outcome.completed.unwrap();
        assert_eq!(done.index, 1);
        assert_eq!(done.bytes_written, 8);
        // 완료 시 마지막 미리보기 재생성
        assert!(matches!(outcome.preview, Some(Ok(PreviewStatus::Written { .. }))));
        assert_eq!(ctrl.sessions().current_index(), 2);
    }

    #[test]
    fn test_corrupt_terminal_keeps_session_when_gated() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            completion_policy: CompletionPolicy::RequireValidFragment,
            ..Config::with_data_dir(dir.path())
        };
        let mut ctrl = Controller::new(config, Some(fake_generator(4, 12))).unwrap();
        let mut radio = MemoryRadio::new();

        let last = Frame::new(FrameType::ImageData, 2, 2, b"tail");
        ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 2, b"head")), &mut radio);

        let outcome = ctrl.handle_rx(&corrupted(&last), &mut radio);
        assert!(outcome.completed.is_none());
        assert_eq!(ctrl.sessions().current_index(), 1);

        // 재전송된 정상 프레임으로 완료
        let outcome = ctrl.handle_rx(&event(&last), &mut radio);
        assert!(outcome.is_ack());
        assert_eq!(outcome.completed.unwrap().bytes_written, 8);
        assert_eq!(fs::read(ctrl.session_path(1)).unwrap(), b"headtail");
        assert_eq!(ctrl.sessions().current_index(), 2);
    }

    #[test]
    fn test_storage_failure_nacks_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        // 세션 파일 자리에 디렉토리를 만들어 열기 실패 유도
        fs::create_dir(ctrl.session_path(1)).unwrap();

        let outcome = ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 3, b"abc")), &mut radio);
        assert!(matches!(outcome.delivery, Err(Error::StorageOpen { .. })));
        assert_eq!(radio.sent, vec![vec![2u8, 0xFF]]);
        assert!(outcome.preview.is_none());
        assert_eq!(ctrl.current_session().fragments, 0);
        assert_eq!(ctrl.stats().storage_failures, 1);
    }

    #[test]
    fn test_telemetry_logged_and_acked() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let frame = Frame::new(FrameType::Telemetry, 9, 0, b"bat=3.91V");
        let outcome = ctrl.handle_rx(&event(&frame), &mut radio);

        assert_eq!(radio.sent, vec![vec![10u8, 0xAA]]);
        assert_eq!(
            outcome.delivery.unwrap(),
            Delivery::Telemetry {
                text: "bat=3.91V".to_string()
            }
        );
        assert_eq!(
            fs::read_to_string(ctrl.config().telemetry_path()).unwrap(),
            "bat=3.91V\n"
        );
    }

    #[test]
    fn test_telemetry_storage_failure_still_acked() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();
        fs::create_dir(ctrl.config().telemetry_path()).unwrap();

        let outcome = ctrl.handle_rx(&event(&Frame::new(FrameType::Telemetry, 0, 0, b"x=1")), &mut radio);
        assert!(outcome.is_ack());
        assert!(matches!(outcome.delivery, Err(Error::StorageOpen { .. })));
    }

    #[test]
    fn test_terminal_telemetry_does_not_complete_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        let outcome = ctrl.handle_rx(&event(&Frame::new(FrameType::Telemetry, 3, 3, b"t")), &mut radio);
        assert!(outcome.completed.is_none());
        assert_eq!(ctrl.sessions().current_index(), 1);
    }

    #[test]
    fn test_reply_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio {
            fail_sends: true,
            ..MemoryRadio::new()
        };

        let outcome = ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 1, b"abc")), &mut radio);
        assert!(outcome.delivery.is_ok());
        assert!(outcome.completed.is_some());
        assert_eq!(ctrl.stats().reply_failures, 1);
        assert_eq!(ctrl.stats().acks_sent, 0);
    }

    #[test]
    fn test_resume_after_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.webp"), b"old").unwrap();
        fs::write(dir.path().join("2.webp"), b"old").unwrap();

        let ctrl = Controller::new(Config::with_data_dir(dir.path()), None).unwrap();
        assert_eq!(ctrl.sessions().current_index(), 3);

        let config = Config {
            resume_file_index: false,
            ..Config::with_data_dir(dir.path())
        };
        let ctrl = Controller::new(config, None).unwrap();
        assert_eq!(ctrl.sessions().current_index(), 1);
    }

    #[test]
    fn test_without_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = Controller::new(Config::with_data_dir(dir.path()), None).unwrap();
        let mut radio = MemoryRadio::new();

        let outcome = ctrl.handle_rx(&event(&Frame::new(FrameType::ImageData, 1, 1, b"abc")), &mut radio);
        assert!(outcome.preview.is_none());
        assert!(outcome.completed.is_some());
        assert!(ctrl.preview_path(1).is_none());
    }

    #[test]
    fn test_tx_done_and_signal_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctrl = controller(dir.path());
        let mut radio = MemoryRadio::new();

        ctrl.handle_rx(&RxEvent::new(Bytes::from_static(&[0, 1]), -100, 2.0), &mut radio);
        ctrl.on_tx_done();

        assert_eq!(ctrl.stats().tx_done, 1);
        assert_eq!(ctrl.stats().average_rssi(), Some(-100.0));
    }
}
