//! 미리보기 생성
//!
//! 세션에 누적된 바이트 전체를 점진적 디코더에 넣고, 그림이 조금이라도 나오면
//! (완전/부분 디코딩 모두) 손실 압축 미리보기로 다시 인코딩해 덮어쓴다.
//! 데이터가 부족한 것은 전송 중의 정상 상태이므로 에러가 아니다.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::webp::{WebpEncoder, WebpIncrementalDecoder};
use crate::{Error, Result};

/// RGBA 픽셀 버퍼 (행 우선, stride = width * 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,

    /// 실제로 디코딩된 행 수 (나머지는 투명 검정)
    pub rows_decoded: u32,

    pub pixels: Vec<u8>,
}

impl RgbaImage {
    pub fn new(width: u32, height: u32, rows_decoded: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rows_decoded: rows_decoded.min(height),
            pixels,
        }
    }

    /// 크기가 유효하고 버퍼 길이가 맞는지
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 4
    }
}

/// 디코딩 결과
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// 전체 디코딩 성공
    Complete(RgbaImage),

    /// 데이터 부족으로 중단됐지만 일부 픽셀 확보
    Partial(RgbaImage),

    /// 헤더도 아직 해석할 수 없음
    NoImageYet,

    /// 비트스트림 에러 등 디코딩 실패
    Failed(String),
}

/// 점진적 이미지 디코더 (RGBA 출력)
pub trait ProgressiveDecoder: Send {
    fn decode(&self, data: &[u8]) -> DecodeOutcome;
}

/// 미리보기 인코더
pub trait PreviewEncoder: Send {
    /// 미리보기 파일 확장자
    fn extension(&self) -> &str;

    fn encode(&self, image: &RgbaImage, quality: f32) -> Result<Vec<u8>>;
}

/// 미리보기 갱신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewStatus {
    Written {
        path: PathBuf,
        width: u32,
        height: u32,
        partial: bool,
        size: usize,
    },
    NoImageYet,
}

/// 미리보기 생성기
pub struct PreviewGenerator {
    decoder: Box<dyn ProgressiveDecoder>,
    encoder: Box<dyn PreviewEncoder>,
    quality: f32,
}

impl std::fmt::Debug for PreviewGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewGenerator")
            .field("extension", &self.encoder.extension())
            .field("quality", &self.quality)
            .finish()
    }
}

impl PreviewGenerator {
    pub fn new(
        decoder: Box<dyn ProgressiveDecoder>,
        encoder: Box<dyn PreviewEncoder>,
        quality: f32,
    ) -> Self {
        Self {
            decoder,
            encoder,
            quality,
        }
    }

    /// libwebp 기반 기본 생성기
    pub fn webp(quality: f32) -> Self {
        Self::new(
            Box::new(WebpIncrementalDecoder::new()),
            Box::new(WebpEncoder),
            quality,
        )
    }

    pub fn extension(&self) -> &str {
        self.encoder.extension()
    }

    /// 누적 데이터로 미리보기 갱신
    pub fn update(&self, data: &[u8], out: &Path) -> Result<PreviewStatus> {
        let (image, partial) = match self.decoder.decode(data) {
            DecodeOutcome::Complete(image) => (image, false),
            DecodeOutcome::Partial(image) => (image, true),
            DecodeOutcome::NoImageYet => return Ok(PreviewStatus::NoImageYet),
            DecodeOutcome::Failed(reason) => return Err(Error::DecodeFailure(reason)),
        };

        if !image.is_valid() {
            debug!(
                "미리보기 건너뜀: 유효하지 않은 버퍼 {}x{} ({} bytes)",
                image.width,
                image.height,
                image.pixels.len()
            );
            return Ok(PreviewStatus::NoImageYet);
        }

        let encoded = self.encoder.encode(&image, self.quality)?;
        fs::write(out, &encoded).map_err(|source| Error::StorageOpen {
            path: out.to_path_buf(),
            source,
        })?;

        Ok(PreviewStatus::Written {
            path: out.to_path_buf(),
            width: image.width,
            height: image.height,
            partial,
            size: encoded.len(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 컨트롤러 테스트용 가짜 코덱

    use super::*;

    /// `min_len` 바이트 이상이면 2x2 이미지, `full_len` 이상이면 완전 디코딩.
    /// 첫 바이트가 0xEE면 실패
    pub struct FakeDecoder {
        pub min_len: usize,
        pub full_len: usize,
    }

    impl ProgressiveDecoder for FakeDecoder {
        fn decode(&self, data: &[u8]) -> DecodeOutcome {
            if data.first() == Some(&0xEE) {
                return DecodeOutcome::Failed("bitstream error".into());
            }
            if data.len() < self.min_len {
                return DecodeOutcome::NoImageYet;
            }
            let image = RgbaImage::new(2, 2, 1, vec![0x80; 16]);
            if data.len() >= self.full_len {
                DecodeOutcome::Complete(image)
            } else {
                DecodeOutcome::Partial(image)
            }
        }
    }

    /// 픽셀을 그대로 쓰는 인코더
    pub struct RawEncoder;

    impl PreviewEncoder for RawEncoder {
        fn extension(&self) -> &str {
            "raw"
        }

        fn encode(&self, image: &RgbaImage, _quality: f32) -> Result<Vec<u8>> {
            Ok(image.pixels.clone())
        }
    }

    pub fn fake_generator(min_len: usize, full_len: usize) -> PreviewGenerator {
        PreviewGenerator::new(
            Box::new(FakeDecoder { min_len, full_len }),
            Box::new(RawEncoder),
            75.0,
        )
    }
}
