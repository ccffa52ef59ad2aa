//! Network fan-out: TCP listeners serving raw or JSON lines.
//!
//! Each listener accepts any number of clients. The pipeline thread
//! publishes pre-formatted lines into a broadcast channel; every client
//! task forwards them and discards whatever the peer sends back. Slow
//! clients that fall behind the channel capacity skip messages rather than
//! stalling the pipeline.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{info, warn};

use uat_core::types::RawFrame;
use uat_core::wire;

/// Initial metadata message advertising this decoder on raw connections.
pub fn header_frame() -> RawFrame {
    let mut metadata = BTreeMap::new();
    metadata.insert("program".to_string(), "uat-decoder".to_string());
    metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
    metadata.insert("fecfix".to_string(), "1".to_string());
    RawFrame::metadata(metadata)
}

pub fn header_line() -> String {
    format!("{}\n", wire::format_frame(&header_frame()))
}

/// Accept clients forever, forwarding broadcast lines to each. `header`,
/// when set, is written once at connection open.
pub async fn serve_lines(
    listener: TcpListener,
    tx: broadcast::Sender<String>,
    header: Option<String>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("accepted a connection from {peer}");
                tokio::spawn(handle_client(socket, tx.subscribe(), header.clone(), peer));
            }
            Err(e) => {
                warn!("accept error: {e}");
            }
        }
    }
}

async fn handle_client(
    socket: TcpStream,
    mut rx: broadcast::Receiver<String>,
    header: Option<String>,
    peer: SocketAddr,
) {
    let (mut read_half, mut write_half) = socket.into_split();

    if let Some(header) = header {
        if write_half.write_all(header.as_bytes()).await.is_err() {
            info!("{peer}: connection closed");
            return;
        }
    }

    let mut discard = [0u8; 512];
    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(line) => {
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        info!("{peer}: connection error: {e}");
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{peer}: slow client, skipped {n} messages");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            result = read_half.read(&mut discard) => match result {
                // clients have nothing to say; read only to notice close
                Ok(0) => {
                    info!("{peer}: connection closed");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    info!("{peer}: connection error: {e}");
                    return;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[test]
    fn test_header_line_format() {
        let line = header_line();
        assert!(line.starts_with("!fecfix=1;program=uat-decoder;version="));
        assert!(line.ends_with(";\n"));
    }

    #[tokio::test]
    async fn test_serve_lines_forwards_with_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _) = broadcast::channel(16);

        tokio::spawn(serve_lines(
            listener,
            tx.clone(),
            Some("!program=test;\n".to_string()),
        ));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut reader = tokio::io::BufReader::new(stream);

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "!program=test;\n");

        // send until the subscriber task has picked us up
        let mut line = String::new();
        while tx.send("-0102;\n".to_string()).is_err() {
            tokio::task::yield_now().await;
        }
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "-0102;\n");
    }
}
