//! UDP echo server: the desktop companion for datagram-level device tests.
//!
//! Connectionless: every datagram is echoed straight back to whoever sent
//! it, with no session state at all. A datagram larger than the receive
//! buffer is truncated by the kernel before we ever see it.
//!
//! Run with: cargo run --bin udp_echo -- 7071
//! Test with: echo 'hello' | nc -u localhost 7071

use std::io;

use tokio::net::UdpSocket;
use tracing::{debug, info};

const BUFFER_SIZE: usize = 64 * 1024;
const REPORT_EVERY: u64 = 100;

async fn echo_loop(socket: UdpSocket) -> io::Result<()> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut datagrams: u64 = 0;
    let mut bytes: u64 = 0;

    loop {
        let (len, addr) = socket.recv_from(&mut buffer).await?;
        socket.send_to(&buffer[..len], addr).await?;

        datagrams += 1;
        bytes += len as u64;
        debug!(%addr, len, "echoed datagram");
        if datagrams % REPORT_EVERY == 0 {
            info!(datagrams, bytes, "running totals");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(7071u16);

    let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
        Ok(socket) => socket,
        Err(e) => {
            eprintln!("cannot bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    info!(port, "udp echo server listening");
    println!("udp echo server on port {} (echo hi | nc -u localhost {})", port, port);

    if let Err(e) = echo_loop(socket).await {
        eprintln!("server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn spawn_echo() -> std::net::SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(echo_loop(socket));
        addr
    }

    #[tokio::test]
    async fn datagram_comes_back_to_sender() {
        let server = spawn_echo().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(b"ping", server).await.unwrap();
        let mut buf = [0u8; 32];
        let (len, from) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("reply within 2s")
            .unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, server);
    }

    #[tokio::test]
    async fn binary_payload_survives_byte_for_byte() {
        let server = spawn_echo().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let payload: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        client.send_to(&payload, server).await.unwrap();
        let mut buf = [0u8; 512];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("reply within 2s")
            .unwrap();
        assert_eq!(&buf[..len], payload.as_slice());
    }

    #[tokio::test]
    async fn replies_are_routed_to_the_right_client() {
        let server = spawn_echo().await;
        let alpha = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let beta = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        alpha.send_to(b"from alpha", server).await.unwrap();
        beta.send_to(b"from beta", server).await.unwrap();

        let mut buf = [0u8; 32];
        let (len, _) = timeout(Duration::from_secs(2), alpha.recv_from(&mut buf))
            .await
            .expect("alpha reply")
            .unwrap();
        assert_eq!(&buf[..len], b"from alpha");

        let (len, _) = timeout(Duration::from_secs(2), beta.recv_from(&mut buf))
            .await
            .expect("beta reply")
            .unwrap();
        assert_eq!(&buf[..len], b"from beta");
    }

    #[tokio::test]
    async fn empty_datagram_is_echoed_empty() {
        let server = spawn_echo().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(&[], server).await.unwrap();
        let mut buf = [0u8; 8];
        let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("reply within 2s")
            .unwrap();
        assert_eq!(len, 0);
    }
}
