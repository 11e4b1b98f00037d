//! 파일 재조립
//!
//! 검증된 프래그먼트를 도착 순서대로 `<data_dir>/<index>.<ext>`에 이어 쓴다.
//! 순서 재정렬이나 중복 제거는 하지 않는다 (송신측이 순서대로 한 번씩 보낸다는 전제).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::session::{FileIndex, Session};
use crate::{Error, Result};

/// 파일 재조립기
#[derive(Debug, Clone)]
pub struct FileReassembler {
    data_dir: PathBuf,
    extension: String,
}

impl FileReassembler {
    pub fn new(data_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// 세션 파일 경로
    pub fn session_path(&self, index: FileIndex) -> PathBuf {
        self.data_dir.join(format!("{}.{}", index, self.extension))
    }

    /// 미리보기 파일 경로
    pub fn preview_path(&self, index: FileIndex, suffix: &str, extension: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}.{}", index, suffix, extension))
    }

    /// 프래그먼트 추가
    ///
    /// 매번 append 모드로 다시 연다. 실패하면 이 프래그먼트는 버려지고
    /// 세션 상태도 바뀌지 않는다. 중간에 쓰기가 실패하면 파일 길이를 되돌린다.
    pub fn append(
        &self,
        session: &mut Session,
        sequence: u8,
        sequence_count: u8,
        bytes: &[u8],
    ) -> Result<()> {
        let path = self.session_path(session.index);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::StorageOpen {
                path: path.clone(),
                source,
            })?;
        write_or_rollback(&mut file, bytes)?;

        session.record_fragment(sequence, sequence_count, bytes);

        debug!(
            "프래그먼트 저장: {} (+{} bytes, 누적 {} bytes)",
            path.display(),
            bytes.len(),
            session.bytes_written()
        );
        Ok(())
    }

    /// 디렉토리에 이미 있는 가장 큰 파일 번호
    pub fn highest_existing_index(&self) -> Result<Option<FileIndex>> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut highest = None;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let index = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<FileIndex>().ok());
            if let Some(index) = index {
                highest = highest.max(Some(index));
            }
        }
        Ok(highest)
    }
}

/// 길이를 되돌릴 수 있는 저장 대상
trait Truncate: Write {
    fn stored_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn stored_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// 전부 쓰거나, 실패하면 쓰기 전 길이로 되돌림
fn write_or_rollback<W: Truncate>(target: &mut W, bytes: &[u8]) -> io::Result<()> {
    let previous_len = target.stored_len()?;
    if let Err(e) = target.write_all(bytes) {
        if let Err(rollback) = target.truncate_to(previous_len) {
            warn!("부분 기록 되돌리기 실패 ({} bytes 기준): {}", previous_len, rollback);
        }
        return Err(e);
    }
    Ok(())
}
