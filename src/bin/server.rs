//! PFT 서버 - Pull File Transfer
//!
//! 잘 알려진 포트에서 `DOWNLOAD` 탐색 요청을 받고, 파일마다
//! 전용 임시 포트 세션을 띄운다. 프로세스 종료까지 실행된다.
//!
//! 사용법:
//!   cargo run --release --bin pft-server -- <port>

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pft::{Config, Dispatcher};

fn usage() -> ! {
    println!("사용법: pft-server <port>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        usage();
    }
    let port: u16 = args[1].parse().unwrap_or_else(|_| usage());

    let config = Config::default();

    info!("PFT Server starting...");
    info!("Chunk size: {} bytes", config.chunk_size);
    info!(
        "Data port range: {}-{}",
        config.data_port_range.start(),
        config.data_port_range.end()
    );

    // 바인드 실패만이 프로세스 전체를 끝내는 유일한 오류다
    let dispatcher = Dispatcher::bind(("0.0.0.0", port), ".", config).await?;
    info!("Server running on port {}", port);

    dispatcher.run().await?;
    Ok(())
}
