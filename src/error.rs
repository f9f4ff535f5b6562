//! 에러 타입 정의

use thiserror::Error;

/// PFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 메시지 형식: {text}")]
    MalformedMessage { text: String },

    #[error("페이로드 디코딩 실패: {reason}")]
    DecodeFailure { reason: String },

    #[error("재시도 한도 초과: {attempts}회 시도, request={request}")]
    RetriesExhausted { attempts: u32, request: String },

    #[error("파일 없음: {name}")]
    FileNotFound { name: String },

    #[error("유효하지 않은 범위: start={start}, end={end}, file_size={file_size}")]
    InvalidRange {
        start: u64,
        end: u64,
        file_size: u64,
    },

    #[error("예상치 못한 응답: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
