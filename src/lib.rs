//! # PFT (Pull File Transfer)
//!
//! UDP 위에서 동작하는 클라이언트 주도형 파일 다운로드 프로토콜
//!
//! ## 핵심 특징
//! - **클라이언트 페이싱**: 클라이언트가 바이트 범위를 명시해 청크를 끌어온다
//! - **Stop-and-wait**: 논리 요청 하나에 응답 하나, 파이프라이닝 없음
//! - **텍스트 그램마**: 제어 메시지는 공백 구분 텍스트, 페이로드는 base64 임베딩
//! - **지수 백오프**: 손실 시 수신 타임아웃 2배 증가로 재전송
//! - **세션 분리**: 전송마다 전용 임시 포트와 파일 핸들, 세션 간 공유 상태 없음
//! - **탐색/전송 분리**: 잘 알려진 포트는 탐색만 처리, 동시 세션 무제한

pub mod channel;
pub mod config;
pub mod error;
pub mod message;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;

pub use channel::{ReliableChannel, RetryState};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Reply, Request};
pub use server::Dispatcher;
pub use session::{Discovery, Downloader, TransferState};
pub use stats::TransferStats;
pub use storage::{FileRangeReader, FileRangeWriter, RangeReader, RangeWriter};

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// 기본 초기 수신 타임아웃 (밀리초)
pub const DEFAULT_INITIAL_TIMEOUT_MS: u64 = 1000;

/// 논리 요청당 최대 시도 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 서버 세션 수신 타임아웃 (밀리초)
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

/// 세션이 스스로 물러나기 전까지 허용되는 연속 타임아웃 폴 수
pub const DEFAULT_MAX_IDLE_POLLS: u32 = 12;

/// 데이터 세션용 임시 포트 할당 범위
pub const DEFAULT_DATA_PORT_RANGE: std::ops::RangeInclusive<u16> = 50000..=51000;

/// 수신 버퍼 크기 (바이트)
///
/// 8KB 청크를 base64로 감싸면 11KB를 넘으므로
/// 최대 UDP 페이로드 크기로 잡는다
pub const MAX_DATAGRAM_SIZE: usize = 65535;
