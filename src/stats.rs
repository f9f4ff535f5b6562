//! 전송 통계

use std::time::{Duration, Instant};

/// 전송 1건의 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 파일 이름
    pub name: String,

    /// 탐색으로 알게 된 파일 전체 크기
    pub file_size: u64,

    /// 수신한 페이로드 바이트
    pub total_bytes: u64,

    /// 수신한 청크 수
    pub chunks: u64,

    /// 다시 요청한 범위 수 (디코딩 실패 등)
    pub retried_ranges: u64,

    /// 완료까지 걸린 시간 (완료 시 기록)
    pub elapsed: Option<Duration>,

    started_at: Instant,
}

impl TransferStats {
    pub fn new(name: &str, file_size: u64) -> Self {
        Self {
            name: name.to_string(),
            file_size,
            total_bytes: 0,
            chunks: 0,
            retried_ranges: 0,
            elapsed: None,
            started_at: Instant::now(),
        }
    }

    pub fn record_chunk(&mut self, bytes: usize) {
        self.chunks += 1;
        self.total_bytes += bytes as u64;
    }

    pub fn record_retry(&mut self) {
        self.retried_ranges += 1;
    }

    pub fn finish(&mut self) {
        self.elapsed = Some(self.started_at.elapsed());
    }

    /// 처리량 (MB/s)
    pub fn throughput_mbps(&self) -> f64 {
        match self.elapsed {
            Some(e) if e.as_secs_f64() > 0.0 => {
                self.total_bytes as f64 / e.as_secs_f64() / 1_000_000.0
            }
            _ => 0.0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} bytes in {} chunks, {} retried ranges, {:.2} MB/s",
            self.name,
            self.total_bytes,
            self.chunks,
            self.retried_ranges,
            self.throughput_mbps()
        )
    }
}
