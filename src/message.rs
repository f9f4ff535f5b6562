//! 와이어 메시지 정의
//!
//! 제어 메시지는 공백 구분 텍스트 토큰이고 키워드는 대소문자를 구분한다.
//! 청크 페이로드는 base64로 인코딩되어 텍스트 메시지 안에 임베딩된다.
//! base64 알파벳에는 공백이 없으므로 인코딩 후에는 토큰 경계가 깨지지 않는다.
//!
//! 파일 이름에는 공백이 올 수 없다 (공백 분할 파싱의 불변 조건).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::{Error, Result};

/// 클라이언트 → 서버 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 파일 탐색 요청: `DOWNLOAD <name>`
    Download { name: String },

    /// 청크 요청: `FILE <name> GET START <s> END <e>`
    Get { name: String, start: u64, end: u64 },

    /// 세션 종료 요청: `FILE <name> CLOSE`
    Close { name: String },
}

/// 서버 → 클라이언트 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// 탐색 성공: `OK <name> SIZE <u64> PORT <u16>`
    Found { name: String, size: u64, port: u16 },

    /// 탐색 실패: `ERR <name> NOT_FOUND`
    NotFound { name: String },

    /// 청크 응답: `FILE <name> OK START <s> END <e> DATA <b64>`
    Chunk {
        name: String,
        start: u64,
        end: u64,
        payload: Bytes,
    },

    /// 종료 확인: `FILE <name> CLOSE_OK`
    CloseOk { name: String },

    /// 일반 오류: `ERR <reason>`
    Error { reason: String },
}

impl Request {
    /// 텍스트 메시지로 인코딩
    pub fn encode(&self) -> String {
        match self {
            Request::Download { name } => format!("DOWNLOAD {name}"),
            Request::Get { name, start, end } => {
                format!("FILE {name} GET START {start} END {end}")
            }
            Request::Close { name } => format!("FILE {name} CLOSE"),
        }
    }

    /// 텍스트 메시지에서 디코딩
    pub fn decode(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            ["DOWNLOAD", name] => Ok(Request::Download {
                name: (*name).to_string(),
            }),
            ["FILE", name, "GET", "START", start, "END", end] => Ok(Request::Get {
                name: (*name).to_string(),
                start: parse_u64(start, text)?,
                end: parse_u64(end, text)?,
            }),
            ["FILE", name, "CLOSE"] => Ok(Request::Close {
                name: (*name).to_string(),
            }),
            _ => Err(malformed(text)),
        }
    }
}

impl Reply {
    /// 텍스트 메시지로 인코딩
    pub fn encode(&self) -> String {
        match self {
            Reply::Found { name, size, port } => format!("OK {name} SIZE {size} PORT {port}"),
            Reply::NotFound { name } => format!("ERR {name} NOT_FOUND"),
            Reply::Chunk {
                name,
                start,
                end,
                payload,
            } => format!(
                "FILE {name} OK START {start} END {end} DATA {}",
                BASE64.encode(payload)
            ),
            Reply::CloseOk { name } => format!("FILE {name} CLOSE_OK"),
            Reply::Error { reason } => format!("ERR {reason}"),
        }
    }

    /// 텍스트 메시지에서 디코딩
    ///
    /// `DATA` 필드는 고정 토큰 위치가 아니라 키워드 검색으로 찾는다.
    /// 인코딩 전 페이로드에 구분자처럼 보이는 문자가 들어 있어도
    /// 인코딩 후에는 영향을 주지 않는다.
    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim();

        if let Some(idx) = text.find(" DATA ") {
            let head: Vec<&str> = text[..idx].split_whitespace().collect();
            let encoded = text[idx + " DATA ".len()..].trim();

            if let ["FILE", name, "OK", "START", start, "END", end] = head.as_slice() {
                let start = parse_u64(start, text)?;
                let end = parse_u64(end, text)?;
                let payload = decode_payload(encoded)?;

                if end < start {
                    return Err(Error::DecodeFailure {
                        reason: format!("끝 오프셋 {end}가 시작 오프셋 {start}보다 앞섬"),
                    });
                }

                // end == u64::MAX면 길이 계산이 넘치므로 checked로 거른다
                let expected =
                    (end - start)
                        .checked_add(1)
                        .ok_or_else(|| Error::DecodeFailure {
                            reason: format!("범위 {start}..={end}의 길이가 u64를 넘음"),
                        })?;
                if payload.len() as u64 != expected {
                    return Err(Error::DecodeFailure {
                        reason: format!(
                            "페이로드 길이 {}가 범위 {start}..={end}와 불일치",
                            payload.len()
                        ),
                    });
                }

                return Ok(Reply::Chunk {
                    name: (*name).to_string(),
                    start,
                    end,
                    payload,
                });
            }
            return Err(malformed(text));
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            ["OK", name, "SIZE", size, "PORT", port] => Ok(Reply::Found {
                name: (*name).to_string(),
                size: parse_u64(size, text)?,
                port: parse_u16(port, text)?,
            }),
            ["ERR", name, "NOT_FOUND"] => Ok(Reply::NotFound {
                name: (*name).to_string(),
            }),
            ["FILE", name, "CLOSE_OK"] => Ok(Reply::CloseOk {
                name: (*name).to_string(),
            }),
            ["ERR", reason @ ..] if !reason.is_empty() => Ok(Reply::Error {
                reason: reason.join(" "),
            }),
            _ => Err(malformed(text)),
        }
    }
}

/// base64 페이로드 디코딩
///
/// - 알파벳 밖의 문자는 잘라내지 않고 즉시 거부한다
/// - `=`는 끝에서만 허용한다
/// - 끝 패딩이 생략된 메시지는 잔여 그룹 길이에서 패딩을 복원해 수용한다
///   (잔여 길이 1은 base64에서 불가능하므로 거부)
fn decode_payload(encoded: &str) -> Result<Bytes> {
    let valid = encoded
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=');
    if !valid {
        return Err(Error::MalformedMessage {
            text: format!("base64 알파벳 밖의 문자 포함: {encoded}"),
        });
    }

    let stripped = encoded.trim_end_matches('=');
    if stripped.contains('=') {
        return Err(Error::MalformedMessage {
            text: format!("패딩이 페이로드 중간에 위치: {encoded}"),
        });
    }

    let residual = stripped.len() % 4;
    if residual == 1 {
        return Err(Error::DecodeFailure {
            reason: format!("잔여 그룹 길이 1은 유효한 base64가 아님 ({}자)", stripped.len()),
        });
    }

    let mut repadded = stripped.to_string();
    for _ in 0..((4 - residual) % 4) {
        repadded.push('=');
    }

    BASE64
        .decode(repadded.as_bytes())
        .map(Bytes::from)
        .map_err(|e| Error::DecodeFailure {
            reason: e.to_string(),
        })
}

fn parse_u64(token: &str, text: &str) -> Result<u64> {
    token.parse().map_err(|_| malformed(text))
}

fn parse_u16(token: &str, text: &str) -> Result<u16> {
    token.parse().map_err(|_| malformed(text))
}

fn malformed(text: &str) -> Error {
    Error::MalformedMessage {
        text: text.to_string(),
    }
}
