//! PFT 클라이언트 - Pull File Transfer
//!
//! 파일 목록의 각 파일을 서버에서 순차적으로 내려받는다.
//! 한 파일을 온전히 받고 닫은 뒤에야 다음 파일로 넘어간다.
//!
//! 사용법:
//!   cargo run --release --bin pft-client -- <server_host> <server_port> <file_list>
//!
//! 파일 목록은 한 줄에 파일 이름 하나인 텍스트 파일이다 (빈 줄 무시).

use std::net::SocketAddr;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use pft::{Config, Downloader, FileRangeWriter};

fn usage() -> ! {
    println!("사용법: pft-client <server_host> <server_port> <file_list>");
    std::process::exit(1);
}

/// 개행 구분 파일 목록을 읽는다 (빈 줄은 건너뜀)
fn read_file_list(path: &str) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        usage();
    }
    let host = &args[1];
    let port: u16 = args[2].parse().unwrap_or_else(|_| usage());
    let list_path = &args[3];

    let server: SocketAddr = tokio::net::lookup_host((host.as_str(), port))
        .await?
        .next()
        .ok_or("서버 주소를 해석할 수 없음")?;

    let files = read_file_list(list_path)?;

    info!("PFT Client starting...");
    info!("Server: {}", server);
    info!("Files to fetch: {}", files.len());

    let config = Config::default();
    let downloader = Downloader::new(server, &config).await?;

    // 파일별 실패는 그 파일만 포기하고 다음 파일로 넘어간다
    for name in &files {
        info!("Requesting: {}", name);
        match downloader
            .fetch(name.as_str(), || FileRangeWriter::create(name.as_str()))
            .await
        {
            Ok(stats) => info!("Download complete: {} ({} bytes)", name, stats.total_bytes),
            Err(e) => error!("Download of {} failed: {}", name, e),
        }
    }

    Ok(())
}
