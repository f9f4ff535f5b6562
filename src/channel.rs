//! 신뢰 요청/응답 채널 (클라이언트 측)
//!
//! 요청 데이터그램 하나를 보내고 응답 데이터그램 하나를 기다리는
//! stop-and-wait 프리미티브. 손실되면 수신 타임아웃을 2배로 늘려
//! 재전송하고, 시도 한도를 넘기면 `RetriesExhausted`로 끝난다.
//!
//! 상관 식별자는 없다: 다음에 도착하는 데이터그램이 마지막 요청의
//! 응답이라고 가정한다 (그램마에 시퀀스 필드가 없음).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

use crate::{Config, Error, Result};

/// 논리 요청 하나의 재시도 상태
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    /// 지금까지의 시도 횟수
    pub attempt: u32,

    /// 현재 수신 타임아웃
    pub timeout: Duration,
}

impl RetryState {
    pub fn new(initial_timeout: Duration) -> Self {
        Self {
            attempt: 0,
            timeout: initial_timeout,
        }
    }

    /// 타임아웃 발생 시: 시도 횟수 증가, 타임아웃 2배
    pub fn backoff(&mut self) {
        self.attempt += 1;
        self.timeout *= 2;
    }
}

/// 클라이언트 측 신뢰 채널
///
/// 소켓 하나를 수명 내내 소유한다. 탐색과 청크 교환 모두 같은
/// 로컬 엔드포인트에서 일어나고 목적지 주소만 바뀐다.
pub struct ReliableChannel {
    socket: UdpSocket,
    initial_timeout: Duration,
    max_retries: u32,
    recv_buffer_size: usize,
}

impl ReliableChannel {
    /// 로컬 주소에 바인드
    pub async fn bind(addr: impl ToSocketAddrs, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            initial_timeout: config.initial_timeout(),
            max_retries: config.max_retries,
            recv_buffer_size: config.recv_buffer_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 요청 텍스트 하나를 보내고 응답 텍스트 하나를 받는다
    ///
    /// 타임아웃은 2배씩 늘고, 그 외 전송 오류는 타임아웃을 늘리지
    /// 않고 재시도한다. 응답 디코딩은 호출자의 몫이다.
    pub async fn exchange(&self, target: SocketAddr, request: &str) -> Result<String> {
        let mut state = RetryState::new(self.initial_timeout);
        let mut buf = vec![0u8; self.recv_buffer_size];

        while state.attempt < self.max_retries {
            if let Err(e) = self.socket.send_to(request.as_bytes(), target).await {
                warn!("send to {} failed, retrying: {}", target, e);
                state.attempt += 1;
                continue;
            }

            match tokio::time::timeout(state.timeout, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    debug!("reply from {} ({} bytes)", from, len);
                    return Ok(String::from_utf8_lossy(&buf[..len]).trim().to_string());
                }
                Ok(Err(e)) => {
                    warn!("recv error, retrying: {}", e);
                    state.attempt += 1;
                }
                Err(_) => {
                    state.backoff();
                    debug!(
                        "timeout waiting for {}, retry {} (next timeout {:?})",
                        target, state.attempt, state.timeout
                    );
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.max_retries,
            request: request.to_string(),
        })
    }
}
