//! libwebp 어댑터
//!
//! - 디코딩: `WebPINewRGB` + `WebPIAppend` 점진적 디코더 (RGBA)
//! - 인코딩: `WebPEncodeRGBA` 손실 압축

use std::os::raw::c_int;
use std::ptr::{self, NonNull};

use libwebp_sys::{
    VP8StatusCode, WebPEncodeRGBA, WebPFree, WebPIAppend, WebPIDecGetRGB, WebPIDecoder,
    WebPIDelete, WebPINewRGB, WEBP_CSP_MODE,
};

use crate::preview::{DecodeOutcome, PreviewEncoder, ProgressiveDecoder, RgbaImage};
use crate::{Error, Result};

/// `WebPIDecoder` 소유 핸들
struct IncrementalHandle(NonNull<WebPIDecoder>);

impl IncrementalHandle {
    fn new_rgba() -> Option<Self> {
        // 출력 버퍼는 libwebp가 디코딩 시작 시 직접 할당
        let raw = unsafe { WebPINewRGB(WEBP_CSP_MODE::MODE_RGBA, ptr::null_mut(), 0, 0) };
        NonNull::new(raw).map(Self)
    }

    fn as_ptr(&self) -> *mut WebPIDecoder {
        self.0.as_ptr()
    }
}

impl Drop for IncrementalHandle {
    fn drop(&mut self) {
        unsafe { WebPIDelete(self.0.as_ptr()) };
    }
}

/// libwebp 점진적 디코더
///
/// 호출마다 새 디코더를 만들어 누적 데이터 전체를 한 번에 넣는다.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpIncrementalDecoder;

impl WebpIncrementalDecoder {
    pub fn new() -> Self {
        Self
    }

    /// 디코더 출력 버퍼를 복사. 디코딩되지 않은 행은 0으로 채움
    fn snapshot(handle: &IncrementalHandle) -> Option<RgbaImage> {
        let mut last_y: c_int = 0;
        let mut width: c_int = 0;
        let mut height: c_int = 0;
        let mut stride: c_int = 0;

        let rgba = unsafe {
            WebPIDecGetRGB(
                handle.as_ptr(),
                &mut last_y,
                &mut width,
                &mut height,
                &mut stride,
            )
        };
        if rgba.is_null() || width <= 0 || height <= 0 || stride < width * 4 {
            return None;
        }

        let (width, height, stride) = (width as usize, height as usize, stride as usize);
        let rows = (last_y.max(0) as usize).min(height);
        let row_len = width * 4;

        let mut pixels = vec![0u8; row_len * height];
        for y in 0..rows {
            // libwebp 버퍼는 handle이 살아 있는 동안 stride * height 크기로 유효
            let src = unsafe { std::slice::from_raw_parts(rgba.add(y * stride), row_len) };
            pixels[y * row_len..(y + 1) * row_len].copy_from_slice(src);
        }

        Some(RgbaImage::new(
            width as u32,
            height as u32,
            rows as u32,
            pixels,
        ))
    }
}

impl ProgressiveDecoder for WebpIncrementalDecoder {
    fn decode(&self, data: &[u8]) -> DecodeOutcome {
        if data.is_empty() {
            return DecodeOutcome::NoImageYet;
        }

        let Some(handle) = IncrementalHandle::new_rgba() else {
            return DecodeOutcome::Failed("WebPINewRGB returned null".to_string());
        };

        let status = unsafe { WebPIAppend(handle.as_ptr(), data.as_ptr(), data.len()) };
        match status {
            VP8StatusCode::VP8_STATUS_OK => match Self::snapshot(&handle) {
                Some(image) => DecodeOutcome::Complete(image),
                None => DecodeOutcome::Failed("decoder reported OK without output".to_string()),
            },
            VP8StatusCode::VP8_STATUS_SUSPENDED => match Self::snapshot(&handle) {
                Some(image) => DecodeOutcome::Partial(image),
                None => DecodeOutcome::NoImageYet,
            },
            other => DecodeOutcome::Failed(format!("{:?}", other)),
        }
    }
}

/// libwebp 손실 압축 인코더
#[derive(Debug, Default, Clone, Copy)]
pub struct WebpEncoder;

impl PreviewEncoder for WebpEncoder {
    fn extension(&self) -> &str {
        "webp"
    }

    fn encode(&self, image: &RgbaImage, quality: f32) -> Result<Vec<u8>> {
        if !image.is_valid() {
            return Err(Error::Encode(format!(
                "invalid RGBA buffer {}x{} ({} bytes)",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }

        let mut output: *mut u8 = ptr::null_mut();
        let size = unsafe {
            WebPEncodeRGBA(
                image.pixels.as_ptr(),
                image.width as c_int,
                image.height as c_int,
                (image.width * 4) as c_int,
                quality,
                &mut output,
            )
        };

        if size == 0 || output.is_null() {
            if !output.is_null() {
                unsafe { WebPFree(output.cast()) };
            }
            return Err(Error::Encode("WebPEncodeRGBA produced no output".to_string()));
        }

        let encoded = unsafe { std::slice::from_raw_parts(output, size) }.to_vec();
        unsafe { WebPFree(output.cast()) };
        Ok(encoded)
    }
}
