//! 로컬 파일 바이트 범위 접근
//!
//! 코어 프로토콜은 파일 I/O를 직접 다루지 않고 바이트 범위
//! 리더/라이터 인터페이스를 통해서만 접근한다. 같은 범위를
//! 다시 쓰는 것은 멱등이므로 청크 재시도가 파일을 손상시키지 않는다.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// 임의 오프셋 읽기 + 길이 조회 (서버 측 협력자)
pub trait RangeReader {
    /// 전체 바이트 길이
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `start` 오프셋부터 `buf.len()`바이트를 정확히 읽는다
    fn read_range(&mut self, start: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// 임의 오프셋 쓰기 (클라이언트 측 협력자)
pub trait RangeWriter {
    /// `start` 오프셋에 `data`를 기록한다
    fn write_range(&mut self, start: u64, data: &[u8]) -> io::Result<()>;
}

/// 파일 기반 범위 리더
pub struct FileRangeReader {
    file: File,
    len: u64,
}

impl FileRangeReader {
    /// 읽기 전용으로 연다
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl RangeReader for FileRangeReader {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&mut self, start: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(buf)
    }
}

/// 파일 기반 범위 라이터
///
/// 파일이 없으면 생성한다. seek 후 쓰기이므로 임의 순서의
/// 범위 기록과 같은 범위 재기록을 허용한다.
pub struct FileRangeWriter {
    file: File,
}

impl FileRangeWriter {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }
}

impl RangeWriter for FileRangeWriter {
    fn write_range(&mut self, start: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(data)
    }
}
