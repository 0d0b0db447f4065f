//! Terminal client for chatrelay: prints every line from the server and
//! forwards each line typed on stdin.
//!
//! `HOST` (default `127.0.0.1`) and `PORT` (default `3000`) pick the server.
use futures::SinkExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{error, info};

use chatrelay::relay::codec::LineCodec;
use chatrelay::relay::config::DEFAULT_PORT;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let stream = TcpStream::connect((host.as_str(), port)).await?;
    info!("connected to {host}:{port}");
    let mut framed = Framed::new(stream, LineCodec::new());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(line)) => println!("{line}"),
                Some(Err(e)) => {
                    error!("connection error: {e}");
                    break;
                }
                None => {
                    info!("server ended the connection");
                    break;
                }
            },
            input = stdin.next_line() => match input {
                Ok(Some(line)) => {
                    // The server trims and ignores blank lines anyway.
                    if let Err(e) = framed.send(line).await {
                        error!("send failed: {e}");
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    info!("disconnecting...");
                    let _ = SinkExt::<String>::close(&mut framed).await;
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("disconnecting...");
                let _ = SinkExt::<String>::close(&mut framed).await;
                break;
            }
        }
    }

    info!("connection closed");
    Ok(())
}
