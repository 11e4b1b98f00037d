//! 텔레메트리 로그
//!
//! 세션과 무관하게 검증된 텍스트를 한 줄씩 공유 로그에 추가한다.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// append-only 텔레메트리 로그
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    path: PathBuf,
}

impl TelemetrySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// payload를 텍스트로 해석 (UTF-8 아님 → 대체 문자, 줄바꿈 → 공백)
    pub fn decode_text(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload)
            .trim_end_matches('\0')
            .replace(|c: char| c == '\r' || c == '\n', " ")
    }

    /// 한 줄 추가. 실패 시 항목은 버려지고 재시도하지 않음
    pub fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| Error::StorageOpen {
                path: self.path.clone(),
                source,
            })?;

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
