//! Raw TCP echo server: the desktop companion for socket-level device tests.
//!
//! One thread per connection. Each thread owns its stream outright and
//! shares nothing with its siblings beyond the active-connection gauge, so
//! a stuck or misbehaving client affects nobody else. Bytes go back exactly
//! as they came in, until the client half-closes or drops.
//!
//! Run with: cargo run --bin tcp_echo -- 7070
//! Test with: nc localhost 7070

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};
use uuid::Uuid;

const BUFFER_SIZE: usize = 4096;

/// Echoes until EOF. Returns the number of bytes echoed.
fn echo_stream(stream: &mut TcpStream) -> io::Result<u64> {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut echoed: u64 = 0;
    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => return Ok(echoed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        stream.write_all(&buffer[..n])?;
        echoed += n as u64;
    }
}

fn handle_connection(mut stream: TcpStream, active: Arc<AtomicUsize>) {
    let session = Uuid::new_v4();
    let peer = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "unknown".to_string(),
    };
    let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
    info!(%session, %peer, active = now_active, "connected");

    match echo_stream(&mut stream) {
        Ok(bytes) => info!(%session, bytes, "disconnected"),
        Err(e) => warn!(%session, error = %e, "connection dropped"),
    }
    active.fetch_sub(1, Ordering::SeqCst);
}

fn serve(listener: TcpListener) -> io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let active = Arc::clone(&active);
                thread::spawn(move || handle_connection(stream, active));
            }
            Err(e) => {
                // A failed accept means the listener itself is gone.
                error!(error = %e, "accept failed");
                return Err(e);
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(7070u16);

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("cannot bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    info!(port, "tcp echo server listening");
    println!("tcp echo server on port {} (nc localhost {})", port, port);

    if let Err(e) = serve(listener) {
        eprintln!("server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Shutdown;

    /// Binds an ephemeral port and serves exactly one connection on a
    /// background thread.
    fn one_shot_server() -> (std::net::SocketAddr, thread::JoinHandle<io::Result<u64>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept()?;
            echo_stream(&mut stream)
        });
        (addr, handle)
    }

    #[test]
    fn bytes_come_back_unchanged() {
        let (addr, server) = one_shot_server();
        let mut client = TcpStream::connect(addr).unwrap();

        client.write_all(b"hello echo").unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"hello echo");

        client.write_all(&[0x00, 0xFF, 0x7F]).unwrap();
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x00, 0xFF, 0x7F]);

        client.shutdown(Shutdown::Write).unwrap();
        assert_eq!(server.join().unwrap().unwrap(), 13);
    }

    #[test]
    fn large_transfer_survives_in_chunks() {
        let (addr, server) = one_shot_server();
        let mut client = TcpStream::connect(addr).unwrap();

        // Interleave writes and reads so neither side's socket buffer fills.
        let chunk: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        for _ in 0..8 {
            client.write_all(&chunk).unwrap();
            let mut reply = vec![0u8; chunk.len()];
            client.read_exact(&mut reply).unwrap();
            assert_eq!(reply, chunk);
        }

        client.shutdown(Shutdown::Write).unwrap();
        assert_eq!(server.join().unwrap().unwrap(), 8 * 8192);
    }

    #[test]
    fn client_eof_ends_the_session_cleanly() {
        let (addr, server) = one_shot_server();
        let client = TcpStream::connect(addr).unwrap();
        drop(client);
        assert_eq!(server.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn accept_errors_shut_the_server_down() {
        // Nonblocking mode makes accept fail deterministically; serve must
        // hand the error back instead of looping on the dead listener.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let err = serve(listener).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn two_clients_echo_independently() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let active = Arc::new(AtomicUsize::new(0));
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                let active = Arc::clone(&active);
                thread::spawn(move || handle_connection(stream, active));
            }
        });

        let clients: Vec<_> = [b"first".as_slice(), b"second!".as_slice()]
            .into_iter()
            .map(|payload| {
                thread::spawn(move || {
                    let mut client = TcpStream::connect(addr).unwrap();
                    client.write_all(payload).unwrap();
                    let mut reply = vec![0u8; payload.len()];
                    client.read_exact(&mut reply).unwrap();
                    assert_eq!(reply, payload);
                })
            })
            .collect();
        for c in clients {
            c.join().unwrap();
        }
        server.join().unwrap();
    }
}
