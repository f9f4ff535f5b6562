//! 프로토콜 설정
//!
//! 타임아웃, 재시도 횟수, 청크 크기 등을 컴파일 타임 상수가 아닌
//! 명시적 설정으로 채널과 세션 생성자에 전달한다.
//! 테스트에서는 아주 짧은 타임아웃으로 교체할 수 있다.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DATA_PORT_RANGE, DEFAULT_IDLE_TIMEOUT_MS,
    DEFAULT_INITIAL_TIMEOUT_MS, DEFAULT_MAX_IDLE_POLLS, DEFAULT_MAX_RETRIES, MAX_DATAGRAM_SIZE,
};

/// PFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 초기 수신 타임아웃 (밀리초)
    /// 타임아웃마다 2배로 늘어난다
    pub initial_timeout_ms: u64,

    /// 논리 요청당 최대 시도 횟수
    pub max_retries: u32,

    /// 서버 세션 수신 타임아웃 (밀리초)
    pub idle_timeout_ms: u64,

    /// 세션 종료 전 허용되는 연속 타임아웃 폴 수
    pub max_idle_polls: u32,

    /// 데이터 세션용 임시 포트 범위
    pub data_port_range: RangeInclusive<u16>,

    /// 수신 버퍼 크기 (바이트)
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_timeout_ms: DEFAULT_INITIAL_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_idle_polls: DEFAULT_MAX_IDLE_POLLS,
            data_port_range: DEFAULT_DATA_PORT_RANGE,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기 수신 타임아웃
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    /// 서버 세션 수신 타임아웃
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// 불안정한 네트워크용 설정
    ///
    /// 청크를 줄여 재전송 비용을 낮추고 재시도 여유를 늘린다
    pub fn lossy_network() -> Self {
        Self {
            chunk_size: 2048,
            initial_timeout_ms: 2000,
            max_retries: 8,
            idle_timeout_ms: 10000,
            max_idle_polls: 18,
            ..Self::default()
        }
    }

    /// 신뢰할 수 있는 LAN용 설정
    pub fn fast_lan() -> Self {
        Self {
            chunk_size: 32768,
            initial_timeout_ms: 200,
            max_retries: 4,
            ..Self::default()
        }
    }
}
