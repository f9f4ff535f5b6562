//! 세션 디스패처와 전송 세션 (서버 측)
//!
//! 잘 알려진 포트는 `DOWNLOAD` 탐색 요청만 처리하고, 파일이 있으면
//! 설정된 범위에서 임시 포트를 하나 골라 세션 태스크를 띄운 뒤
//! 곧바로 다음 탐색을 받는다. 탐색과 데이터 전송이 분리되어 있어
//! 동시 세션 수에 제한이 없다.
//!
//! 각 세션은 자기 소켓과 파일 핸들을 독점 소유하므로
//! 세션 간 잠금이 필요 없다.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use bytes::Bytes;
use rand::Rng;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::message::{Reply, Request};
use crate::storage::{FileRangeReader, RangeReader};
use crate::{Config, Error, Result};

/// 임시 포트 바인드 시도 한도
const MAX_BIND_ATTEMPTS: u32 = 32;

/// 서버 측 세션 디스패처
pub struct Dispatcher {
    socket: UdpSocket,
    root: PathBuf,
    config: Config,
}

impl Dispatcher {
    /// 잘 알려진 엔드포인트에 바인드
    ///
    /// 파일 이름은 `root` 디렉터리 아래에서 찾는다.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        root: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            root: root.into(),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 수락 루프. 프로세스 종료까지 실행된다.
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        info!("dispatcher listening on {}", self.socket.local_addr()?);

        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let text = String::from_utf8_lossy(&buf[..len]).trim().to_string();

            // 잘 알려진 포트는 DOWNLOAD만 처리한다. 그 외는 무시.
            let name = match Request::decode(&text) {
                Ok(Request::Download { name }) => name,
                Ok(_) => {
                    debug!("non-discovery request on control port from {}", peer);
                    continue;
                }
                Err(_) => {
                    debug!("ignoring unrecognized datagram from {}", peer);
                    continue;
                }
            };

            if let Err(e) = self.accept_download(&name, peer).await {
                warn!("discovery of {} from {} failed: {}", name, peer, e);
            }
        }
    }

    /// 탐색 요청 하나를 처리한다: 파일 확인, 임시 포트 할당, 세션 분리
    async fn accept_download(&self, name: &str, peer: SocketAddr) -> Result<()> {
        let reader = match FileRangeReader::open(self.root.join(name)) {
            Ok(reader) => reader,
            Err(e) => {
                info!("{} not found for {} ({})", name, peer, e);
                let reply = Reply::NotFound {
                    name: name.to_string(),
                };
                self.socket.send_to(reply.encode().as_bytes(), peer).await?;
                return Ok(());
            }
        };

        let data_socket = bind_ephemeral(self.socket.local_addr()?.ip(), &self.config).await?;
        let data_port = data_socket.local_addr()?.port();
        let size = reader.len();

        let reply = Reply::Found {
            name: name.to_string(),
            size,
            port: data_port,
        };
        self.socket.send_to(reply.encode().as_bytes(), peer).await?;

        info!(
            "serving {} ({} bytes) to {} on port {}",
            name, size, peer, data_port
        );

        let session = Session {
            socket: data_socket,
            reader,
            name: name.to_string(),
            config: self.config.clone(),
        };
        tokio::spawn(session.run());

        Ok(())
    }
}

/// 설정된 범위에서 임의 포트를 골라 바인드를 시도한다
async fn bind_ephemeral(ip: IpAddr, config: &Config) -> Result<UdpSocket> {
    let lo = *config.data_port_range.start();
    let hi = *config.data_port_range.end();

    for _ in 0..MAX_BIND_ATTEMPTS {
        let port = rand::thread_rng().gen_range(lo..=hi);
        match UdpSocket::bind((ip, port)).await {
            Ok(socket) => return Ok(socket),
            Err(e) => debug!("data port {} unavailable: {}", port, e),
        }
    }

    Err(Error::Io(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("데이터 포트 범위 {lo}-{hi} 소진"),
    )))
}

/// 서버 측 전송 세션
///
/// 전용 임시 소켓과 파일 핸들을 독점 소유한다. `CLOSE`를 받거나
/// 연속 타임아웃 폴 한도를 넘기면 물러나면서 둘 다 해제한다.
struct Session<R: RangeReader> {
    socket: UdpSocket,
    reader: R,
    name: String,
    config: Config,
}

impl<R: RangeReader> Session<R> {
    async fn run(mut self) {
        if let Err(e) = self.serve().await {
            warn!("session for {} ended with error: {}", self.name, e);
        }
    }

    async fn serve(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let idle = self.config.idle_timeout();
        let mut idle_polls = 0u32;
        let file_size = self.reader.len();

        loop {
            let (len, peer) = match timeout(idle, self.socket.recv_from(&mut buf)).await {
                Ok(received) => {
                    idle_polls = 0;
                    received?
                }
                Err(_) => {
                    idle_polls += 1;
                    if idle_polls >= self.config.max_idle_polls {
                        info!("session for {} idle, retiring", self.name);
                        return Ok(());
                    }
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]).trim().to_string();
            let request = match Request::decode(&text) {
                Ok(request) => request,
                Err(_) => {
                    // 모양이 안 맞는 데이터그램은 응답 없이 무시
                    debug!("ignoring unrecognized datagram from {}", peer);
                    continue;
                }
            };

            match request {
                Request::Get { start, end, .. } => {
                    // 응답 송신 실패는 세션을 끝내지 않는다:
                    // 클라이언트가 같은 범위를 다시 요청할 수 있어야 한다
                    let reply = self.read_chunk(start, end, file_size);
                    if let Err(e) = self.socket.send_to(reply.encode().as_bytes(), peer).await {
                        warn!("send to {} for {} failed: {}", peer, self.name, e);
                    }
                }
                Request::Close { name } => {
                    let reply = Reply::CloseOk { name };
                    if let Err(e) = self.socket.send_to(reply.encode().as_bytes(), peer).await {
                        warn!("send of CLOSE_OK to {} failed: {}", peer, e);
                    }
                    info!("session for {} closed by {}", self.name, peer);
                    // 소켓과 파일 핸들은 드롭으로 해제된다
                    return Ok(());
                }
                Request::Download { .. } => {
                    debug!("stray DOWNLOAD on data port from {}", peer);
                }
            }
        }
    }

    /// 범위를 검증하고 청크 응답을 만든다
    fn read_chunk(&mut self, start: u64, end: u64, file_size: u64) -> Reply {
        if start > end || end >= file_size {
            let rejected = Error::InvalidRange {
                start,
                end,
                file_size,
            };
            debug!("rejecting request for {}: {}", self.name, rejected);
            return Reply::Error {
                reason: "Invalid range".to_string(),
            };
        }

        let len = (end - start + 1) as usize;
        let mut data = vec![0u8; len];
        match self.reader.read_range(start, &mut data) {
            Ok(()) => Reply::Chunk {
                name: self.name.clone(),
                start,
                end,
                payload: Bytes::from(data),
            },
            Err(e) => {
                warn!("read of {}..={} for {} failed: {}", start, end, self.name, e);
                Reply::Error {
                    reason: "Read failed".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::session::Downloader;
    use crate::storage::RangeWriter;

    /// 테스트용 인메모리 리더
    struct MemReader(Vec<u8>);

    impl RangeReader for MemReader {
        fn len(&self) -> u64 {
            self.0.len() as u64
        }

        fn read_range(&mut self, start: u64, buf: &mut [u8]) -> io::Result<()> {
            let start = start as usize;
            buf.copy_from_slice(&self.0[start..start + buf.len()]);
            Ok(())
        }
    }

    /// 테스트용 공유 메모리 라이터
    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl SharedWriter {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl RangeWriter for SharedWriter {
        fn write_range(&mut self, start: u64, data: &[u8]) -> io::Result<()> {
            let mut buf = self.0.lock().unwrap();
            let end = start as usize + data.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[start as usize..end].copy_from_slice(data);
            Ok(())
        }
    }

    fn test_config(chunk_size: usize, port_lo: u16, port_hi: u16) -> Config {
        Config {
            chunk_size,
            initial_timeout_ms: 200,
            max_retries: 3,
            idle_timeout_ms: 5000,
            data_port_range: port_lo..=port_hi,
            ..Config::default()
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 251) as u8).collect()
    }

    async fn start_dispatcher(dir: &std::path::Path, config: Config) -> SocketAddr {
        let dispatcher = Dispatcher::bind("127.0.0.1:0", dir, config)
            .await
            .unwrap();
        let addr = dispatcher.local_addr().unwrap();
        tokio::spawn(dispatcher.run());
        addr
    }

    fn write_file(dir: &std::path::Path, name: &str, data: &[u8]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(data).unwrap();
    }

    #[tokio::test]
    async fn test_read_chunk_validates_range() {
        let mut session = Session {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            reader: MemReader(vec![1, 2, 3, 4, 5]),
            name: "m.bin".to_string(),
            config: Config::default(),
        };

        // 경계: 마지막 1바이트
        match session.read_chunk(4, 4, 5) {
            Reply::Chunk { payload, .. } => assert_eq!(payload.as_ref(), &[5]),
            other => panic!("unexpected: {other:?}"),
        }

        // end가 파일 크기를 넘으면 거부
        match session.read_chunk(0, 5, 5) {
            Reply::Error { reason } => assert_eq!(reason, "Invalid range"),
            other => panic!("unexpected: {other:?}"),
        }

        // start > end 거부
        match session.read_chunk(3, 2, 5) {
            Reply::Error { reason } => assert_eq!(reason, "Invalid range"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_transfer_reproduces_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = patterned(20000);
        write_file(dir.path(), "big.bin", &data);

        let addr = start_dispatcher(dir.path(), test_config(1024, 52000, 52099)).await;
        let downloader = Downloader::new(addr, &test_config(1024, 52000, 52099))
            .await
            .unwrap();

        let writer = SharedWriter::default();
        let writer_clone = writer.clone();
        let stats = downloader
            .fetch("big.bin", move || Ok(writer_clone))
            .await
            .unwrap();

        assert_eq!(writer.contents(), data);
        assert_eq!(stats.total_bytes, 20000);
        // 1024 청크로 20000바이트 → 20개 (마지막은 544바이트)
        assert_eq!(stats.chunks, 20);
    }

    #[tokio::test]
    async fn test_chunk_size_not_dividing_length() {
        let dir = tempfile::tempdir().unwrap();
        let data = patterned(10);
        write_file(dir.path(), "small.bin", &data);

        let addr = start_dispatcher(dir.path(), test_config(3, 52100, 52199)).await;
        let downloader = Downloader::new(addr, &test_config(3, 52100, 52199))
            .await
            .unwrap();

        let writer = SharedWriter::default();
        let writer_clone = writer.clone();
        let stats = downloader
            .fetch("small.bin", move || Ok(writer_clone))
            .await
            .unwrap();

        assert_eq!(writer.contents(), data);
        // 3바이트 청크로 10바이트 → 3 + 3 + 3 + 1
        assert_eq!(stats.chunks, 4);
    }

    #[tokio::test]
    async fn test_missing_file_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_dispatcher(dir.path(), test_config(1024, 52200, 52299)).await;
        let downloader = Downloader::new(addr, &test_config(1024, 52200, 52299))
            .await
            .unwrap();

        let result = downloader
            .fetch("missing.txt", || Ok(SharedWriter::default()))
            .await;

        match result {
            Err(Error::FileNotFound { name }) => assert_eq!(name, "missing.txt"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_range_rejected_session_continues() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "five.bin", &[1, 2, 3, 4, 5]);

        let addr = start_dispatcher(dir.path(), test_config(1024, 52300, 52399)).await;

        // 원시 소켓으로 탐색과 GET을 직접 주고받는다
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 4096];

        socket.send_to(b"DOWNLOAD five.bin", addr).await.unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let reply = Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap();
        let data_addr = match reply {
            Reply::Found { size, port, .. } => {
                assert_eq!(size, 5);
                SocketAddr::new(addr.ip(), port)
            }
            other => panic!("unexpected: {other:?}"),
        };

        // end >= size → ERR Invalid range
        socket
            .send_to(b"FILE five.bin GET START 0 END 5", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ERR Invalid range");

        // 거부 후에도 세션은 살아 있다: 경계 요청 start == end == size-1
        socket
            .send_to(b"FILE five.bin GET START 4 END 4", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        match Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap() {
            Reply::Chunk { payload, start, end, .. } => {
                assert_eq!((start, end), (4, 4));
                assert_eq!(payload.as_ref(), &[5]);
            }
            other => panic!("unexpected: {other:?}"),
        }

        socket
            .send_to(b"FILE five.bin CLOSE", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"FILE five.bin CLOSE_OK");
    }

    #[tokio::test]
    async fn test_closed_session_port_stops_answering() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "once.bin", &patterned(64));

        let addr = start_dispatcher(dir.path(), test_config(32, 52400, 52499)).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 4096];

        socket.send_to(b"DOWNLOAD once.bin", addr).await.unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let data_addr = match Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap() {
            Reply::Found { port, .. } => SocketAddr::new(addr.ip(), port),
            other => panic!("unexpected: {other:?}"),
        };

        socket
            .send_to(b"FILE once.bin CLOSE", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"FILE once.bin CLOSE_OK");

        // 종료된 포트는 더 이상 GET에 응답하지 않는다
        socket
            .send_to(b"FILE once.bin GET START 0 END 31", data_addr)
            .await
            .unwrap();
        let silent =
            tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn test_idle_session_retires() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "idle.bin", &patterned(16));

        let config = Config {
            idle_timeout_ms: 30,
            max_idle_polls: 2,
            ..test_config(8, 52500, 52599)
        };
        let addr = start_dispatcher(dir.path(), config).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 4096];

        socket.send_to(b"DOWNLOAD idle.bin", addr).await.unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let data_addr = match Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap() {
            Reply::Found { port, .. } => SocketAddr::new(addr.ip(), port),
            other => panic!("unexpected: {other:?}"),
        };

        // 연속 타임아웃 폴 한도(2 x 30ms)를 넘길 때까지 대기
        tokio::time::sleep(Duration::from_millis(200)).await;

        socket
            .send_to(b"FILE idle.bin GET START 0 END 7", data_addr)
            .await
            .unwrap();
        let silent =
            tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn test_reply_send_failure_keeps_session_alive() {
        // 60000바이트를 base64로 감싸면 UDP 페이로드 한계(65507)를
        // 넘어 송신이 실패한다. 유효한 범위였으므로 세션은 살아남아
        // 다음 요청에 계속 응답해야 한다
        let dir = tempfile::tempdir().unwrap();
        let data = patterned(60000);
        write_file(dir.path(), "huge.bin", &data);

        let addr = start_dispatcher(dir.path(), test_config(1024, 52800, 52899)).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 65535];

        socket.send_to(b"DOWNLOAD huge.bin", addr).await.unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let data_addr = match Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap() {
            Reply::Found { port, .. } => SocketAddr::new(addr.ip(), port),
            other => panic!("unexpected: {other:?}"),
        };

        // 응답이 데이터그램 하나에 담기지 않는 전체 범위 요청
        socket
            .send_to(b"FILE huge.bin GET START 0 END 59999", data_addr)
            .await
            .unwrap();
        let silent =
            tokio::time::timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await;
        assert!(silent.is_err());

        // 세션은 여전히 살아 있다
        socket
            .send_to(b"FILE huge.bin GET START 0 END 9", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        match Reply::decode(&String::from_utf8_lossy(&buf[..len])).unwrap() {
            Reply::Chunk { payload, .. } => assert_eq!(payload.as_ref(), &data[..10]),
            other => panic!("unexpected: {other:?}"),
        }

        socket
            .send_to(b"FILE huge.bin CLOSE", data_addr)
            .await
            .unwrap();
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"FILE huge.bin CLOSE_OK");
    }

    #[tokio::test]
    async fn test_zero_length_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "empty.bin", &[]);

        let addr = start_dispatcher(dir.path(), test_config(1024, 52600, 52699)).await;
        let downloader = Downloader::new(addr, &test_config(1024, 52600, 52699))
            .await
            .unwrap();

        let writer = SharedWriter::default();
        let writer_clone = writer.clone();
        let stats = downloader
            .fetch("empty.bin", move || Ok(writer_clone))
            .await
            .unwrap();

        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.chunks, 0);
        assert!(writer.contents().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let data_a = patterned(5000);
        let data_b: Vec<u8> = patterned(7000).iter().rev().copied().collect();
        write_file(dir.path(), "a.bin", &data_a);
        write_file(dir.path(), "b.bin", &data_b);

        let config = test_config(512, 52700, 52799);
        let addr = start_dispatcher(dir.path(), config.clone()).await;

        let down_a = Downloader::new(addr, &config).await.unwrap();
        let down_b = Downloader::new(addr, &config).await.unwrap();

        let writer_a = SharedWriter::default();
        let writer_b = SharedWriter::default();
        let (clone_a, clone_b) = (writer_a.clone(), writer_b.clone());

        let (res_a, res_b) = tokio::join!(
            down_a.fetch("a.bin", move || Ok(clone_a)),
            down_b.fetch("b.bin", move || Ok(clone_b)),
        );
        res_a.unwrap();
        res_b.unwrap();

        assert_eq!(writer_a.contents(), data_a);
        assert_eq!(writer_b.contents(), data_b);
    }
}
