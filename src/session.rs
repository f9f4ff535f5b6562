//! 전송 세션 상태 머신 (클라이언트 측)
//!
//! `Idle → Discovering → Downloading → Closing → Done` 순서로 진행하고,
//! 복구 불가능한 오류가 나면 어느 상태에서든 `Failed`로 끝난다.
//!
//! - 탐색은 잘 알려진 제어 포트로, 청크/종료 교환은 탐색 응답이
//!   알려준 전용 데이터 포트로 보낸다 (로컬 소켓은 하나를 재사용)
//! - 커서는 성공한 청크 교환으로만 전진한다. 응답이 깨졌으면
//!   같은 범위를 다음 반복에서 다시 요청한다
//! - 전진 폭은 서버가 에코한 끝 오프셋을 따른다
//!   (서버 측 청크 크기 변경 허용)

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, warn};

use crate::channel::ReliableChannel;
use crate::message::{Reply, Request};
use crate::stats::TransferStats;
use crate::storage::RangeWriter;
use crate::{Config, Error, Result};

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Discovering,
    Downloading,
    Closing,
    Done,
    Failed,
}

/// 탐색 결과: 파일 크기와 전용 데이터 엔드포인트
#[derive(Debug, Clone, Copy)]
pub struct Discovery {
    pub file_size: u64,
    pub data_addr: SocketAddr,
}

/// 클라이언트 측 다운로더
///
/// 엄격히 순차적이다: 파일 하나를 온전히 받고 닫은 뒤에야
/// 다음 파일로 넘어간다. 동시 전송도 파이프라이닝도 없다.
pub struct Downloader {
    channel: ReliableChannel,
    server_ip: IpAddr,
    control_port: u16,
    chunk_size: u64,
}

impl Downloader {
    /// 로컬 소켓 하나를 바인드하고 다운로더를 만든다
    pub async fn new(server: SocketAddr, config: &Config) -> Result<Self> {
        let channel = ReliableChannel::bind("0.0.0.0:0", config).await?;
        debug!("downloader bound to {}", channel.local_addr()?);
        Ok(Self {
            channel,
            server_ip: server.ip(),
            control_port: server.port(),
            chunk_size: config.chunk_size as u64,
        })
    }

    /// 파일 하나를 내려받는다
    ///
    /// 라이터는 탐색이 성공한 뒤에만 생성된다. 서버에 없는 파일은
    /// 로컬에 빈 파일을 남기지 않는다.
    pub async fn fetch<W, F>(&self, name: &str, make_writer: F) -> Result<TransferStats>
    where
        W: RangeWriter,
        F: FnOnce() -> std::io::Result<W>,
    {
        match self.run_transfer(name, make_writer).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                debug!("transfer of {} entered state {:?}", name, TransferState::Failed);
                Err(e)
            }
        }
    }

    async fn run_transfer<W, F>(&self, name: &str, make_writer: F) -> Result<TransferStats>
    where
        W: RangeWriter,
        F: FnOnce() -> std::io::Result<W>,
    {
        let mut state = TransferState::Idle;
        debug!("{}: state {:?}", name, state);

        state = TransferState::Discovering;
        debug!("{}: state {:?}", name, state);
        let discovery = self.discover(name).await?;
        info!(
            "discovered {}: {} bytes, data endpoint {}",
            name, discovery.file_size, discovery.data_addr
        );

        let mut writer = make_writer()?;
        let mut stats = TransferStats::new(name, discovery.file_size);

        state = TransferState::Downloading;
        debug!("{}: state {:?}", name, state);
        self.download(name, &discovery, &mut writer, &mut stats)
            .await?;

        state = TransferState::Closing;
        debug!("{}: state {:?}", name, state);
        self.close(name, discovery.data_addr).await;

        state = TransferState::Done;
        debug!("{}: state {:?}", name, state);
        stats.finish();
        info!("{}", stats.summary());
        Ok(stats)
    }

    /// `Idle → Discovering`: 제어 포트에 `DOWNLOAD`를 보낸다
    async fn discover(&self, name: &str) -> Result<Discovery> {
        let control = SocketAddr::new(self.server_ip, self.control_port);
        let request = Request::Download {
            name: name.to_string(),
        }
        .encode();

        let reply_text = self.channel.exchange(control, &request).await?;
        match Reply::decode(&reply_text)? {
            Reply::Found { size, port, .. } => Ok(Discovery {
                file_size: size,
                data_addr: SocketAddr::new(self.server_ip, port),
            }),
            Reply::NotFound { .. } => Err(Error::FileNotFound {
                name: name.to_string(),
            }),
            other => Err(Error::UnexpectedReply {
                expected: "OK".to_string(),
                got: other.encode(),
            }),
        }
    }

    /// `Downloading` 루프: 커서가 파일 끝에 닿을 때까지 순차 요청
    async fn download<W: RangeWriter>(
        &self,
        name: &str,
        discovery: &Discovery,
        writer: &mut W,
        stats: &mut TransferStats,
    ) -> Result<()> {
        let mut cursor: u64 = 0;

        while cursor < discovery.file_size {
            let end = (cursor + self.chunk_size - 1).min(discovery.file_size - 1);
            let request = Request::Get {
                name: name.to_string(),
                start: cursor,
                end,
            }
            .encode();

            let reply_text = self.channel.exchange(discovery.data_addr, &request).await?;
            match Reply::decode(&reply_text) {
                Ok(Reply::Chunk {
                    end: echoed_end,
                    payload,
                    ..
                }) => {
                    writer.write_range(cursor, &payload)?;
                    stats.record_chunk(payload.len());
                    cursor = echoed_end + 1;
                }
                Ok(other) => {
                    // 커서는 전진하지 않는다: 같은 범위를 다시 요청
                    warn!(
                        "unexpected reply at offset {} for {}: {}",
                        cursor,
                        name,
                        other.encode()
                    );
                    stats.record_retry();
                }
                Err(e) => {
                    warn!(
                        "undecodable reply at offset {} for {}, re-requesting: {}",
                        cursor, name, e
                    );
                    stats.record_retry();
                }
            }
        }

        Ok(())
    }

    /// `Closing`: 종료는 최선 노력이다. 어떤 응답이든 종료로 취급하고,
    /// 응답을 끝내 못 받아도 전송 자체는 이미 완료된 상태다.
    async fn close(&self, name: &str, data_addr: SocketAddr) {
        let request = Request::Close {
            name: name.to_string(),
        }
        .encode();

        match self.channel.exchange(data_addr, &request).await {
            Ok(reply_text) => match Reply::decode(&reply_text) {
                Ok(Reply::CloseOk { .. }) => debug!("session for {} closed", name),
                Ok(other) => warn!("unexpected close reply for {}: {}", name, other.encode()),
                Err(e) => warn!("malformed close reply for {}: {}", name, e),
            },
            Err(e) => warn!("close exchange for {} failed: {}", name, e),
        }
    }
}
