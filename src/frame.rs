//! 무선 프레임 코덱
//!
//! ```text
//! +------+----------+----------------+-------------+-----------------+
//! | type | sequence | sequence_count |   payload   | crc32 (4B, LE)  |
//! +------+----------+----------------+-------------+-----------------+
//! ```
//!
//! CRC는 마지막 4바이트를 제외한 전체(type ∥ sequence ∥ sequence_count ∥ payload)에 대해 계산

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    integrity, Error, Result, ACK_MARKER, CHECKSUM_LEN, HEADER_LEN, MIN_FRAME_LEN, NACK_MARKER,
    REPLY_LEN,
};

/// 프레임 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// 이미지 데이터 프래그먼트
    ImageData,

    /// 텔레메트리 텍스트
    Telemetry,

    /// 프로토콜에 정의되지 않은 타입
    Unknown(u8),
}

impl FrameType {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::ImageData => 0,
            FrameType::Telemetry => 1,
            FrameType::Unknown(b) => b,
        }
    }
}

impl From<u8> for FrameType {
    fn from(b: u8) -> Self {
        match b {
            0 => FrameType::ImageData,
            1 => FrameType::Telemetry,
            other => FrameType::Unknown(other),
        }
    }
}

/// 디코딩된 (또는 송신용으로 생성된) 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub sequence: u8,
    pub sequence_count: u8,

    /// 순수 데이터 영역 (`raw`의 슬라이스)
    pub payload: Bytes,

    /// 프레임 끝에 실려 온 CRC 값
    pub checksum: u32,

    raw: Bytes,
}

impl Frame {
    /// 송신용 프레임 생성 (CRC 자동 계산)
    pub fn new(frame_type: FrameType, sequence: u8, sequence_count: u8, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
        buf.put_u8(frame_type.as_byte());
        buf.put_u8(sequence);
        buf.put_u8(sequence_count);
        buf.put_slice(payload);

        let checksum = integrity::compute(&buf);
        buf.put_u32_le(checksum);

        let raw = buf.freeze();
        let payload = raw.slice(HEADER_LEN..raw.len() - CHECKSUM_LEN);

        Self {
            frame_type,
            sequence,
            sequence_count,
            payload,
            checksum,
            raw,
        }
    }

    /// 수신 프레임 디코딩
    ///
    /// 6바이트 프레임은 헤더와 CRC 영역이 겹친다. 이 경우 payload는 비어 있고
    /// CRC 범위는 앞 2바이트뿐이다.
    pub fn decode(raw: Bytes) -> Result<Self> {
        let len = raw.len();
        if len < MIN_FRAME_LEN {
            return Err(Error::FrameTooShort {
                len,
                min: MIN_FRAME_LEN,
            });
        }

        let crc_start = len - CHECKSUM_LEN;
        let checksum = u32::from_le_bytes([
            raw[crc_start],
            raw[crc_start + 1],
            raw[crc_start + 2],
            raw[crc_start + 3],
        ]);
        let payload = if crc_start > HEADER_LEN {
            raw.slice(HEADER_LEN..crc_start)
        } else {
            Bytes::new()
        };

        Ok(Self {
            frame_type: FrameType::from(raw[0]),
            sequence: raw[1],
            sequence_count: raw[2],
            payload,
            checksum,
            raw,
        })
    }

    /// CRC 계산 대상 영역 (마지막 4바이트 제외)
    pub fn checksummed_region(&self) -> &[u8] {
        &self.raw[..self.raw.len() - CHECKSUM_LEN]
    }

    /// 수신측에서 다시 계산한 CRC
    pub fn computed_checksum(&self) -> u32 {
        integrity::compute(self.checksummed_region())
    }

    /// CRC 검증
    pub fn verify_checksum(&self) -> bool {
        integrity::verify(self.checksummed_region(), self.checksum)
    }

    /// CRC 검증 (실패 시 에러)
    pub fn check(&self) -> Result<()> {
        let got = self.computed_checksum();
        if got == self.checksum {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                expected: self.checksum,
                got,
            })
        }
    }

    /// 응답 프레임에 실리는 시퀀스 번호 (수신 시퀀스 + 1)
    pub fn reply_sequence(&self) -> u8 {
        self.sequence.wrapping_add(1)
    }

    /// 파일의 마지막 프래그먼트 여부
    pub fn is_terminal(&self) -> bool {
        self.sequence == self.sequence_count
    }

    /// 와이어 바이트
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn encode(&self) -> Bytes {
        self.raw.clone()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// 응답 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ack,
    Nack,
}

impl ReplyKind {
    pub fn marker(self) -> u8 {
        match self {
            ReplyKind::Ack => ACK_MARKER,
            ReplyKind::Nack => NACK_MARKER,
        }
    }
}

/// 2바이트 ACK/NACK 응답 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub sequence: u8,
    pub kind: ReplyKind,
}

impl Reply {
    pub fn ack(sequence: u8) -> Self {
        Self {
            sequence,
            kind: ReplyKind::Ack,
        }
    }

    pub fn nack(sequence: u8) -> Self {
        Self {
            sequence,
            kind: ReplyKind::Nack,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.kind == ReplyKind::Ack
    }

    pub fn to_bytes(&self) -> [u8; REPLY_LEN] {
        [self.sequence, self.kind.marker()]
    }

    /// 송신측에서 응답 파싱
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [sequence, ACK_MARKER] => Ok(Self::ack(*sequence)),
            [sequence, NACK_MARKER] => Ok(Self::nack(*sequence)),
            _ => Err(Error::InvalidReply(bytes.to_vec())),
        }
    }
}

/// ACK/NACK 응답 바이트 생성
pub fn build_ack(sequence: u8, ok: bool) -> [u8; REPLY_LEN] {
    if ok {
        Reply::ack(sequence).to_bytes()
    } else {
        Reply::nack(sequence).to_bytes()
    }
}
