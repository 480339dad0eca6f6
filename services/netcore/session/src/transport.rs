//! TCP transport helpers for sessions.
//!
//! Sessions share one `TcpStream` between the receive loop and the send loop,
//! so reads and writes here work through `&TcpStream` with readiness polling
//! instead of exclusive `AsyncRead`/`AsyncWrite` borrows.

use netcore_buffer::ByteBuffer;
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::net::{TcpListener, TcpStream};

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Read once into the free tail of `buffer`, at most `max` bytes.
///
/// Returns `Ok(0)` on end of stream.
pub async fn read_some(socket: &TcpStream, buffer: &mut ByteBuffer, max: usize) -> io::Result<usize> {
    buffer.reserve(max);
    loop {
        socket.readable().await?;
        match socket.try_read_buf(&mut buffer.writable(max)) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write every byte of `data`
pub async fn write_all(socket: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        socket.writable().await?;
        match socket.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Shut down both directions of the connection
pub fn shutdown_both(socket: &TcpStream) -> io::Result<()> {
    SockRef::from(socket).shutdown(Shutdown::Both)
}

/// Whether a close-side error only says the socket is already gone
pub fn is_benign_close_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotConnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn pair() -> (TcpStream, TcpStream) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let client = connect_tcp(bound_addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let (client, server) = pair().await;
        assert!(client.peer_addr().is_ok());
        assert_eq!(client.local_addr().unwrap(), server.peer_addr().unwrap());
    }

    #[tokio::test]
    async fn test_read_some_appends_after_retained_bytes() {
        let (mut client, server) = pair().await;
        client.write_all(b"EF").await.unwrap();

        let mut buffer = ByteBuffer::from(&b"BCD"[..]);
        let n = read_some(&server, &mut buffer, 8192).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(buffer.as_slice(), b"BCDEF");
    }

    #[tokio::test]
    async fn test_read_some_respects_max() {
        let (mut client, server) = pair().await;
        client.write_all(b"0123456789").await.unwrap();
        // Let both segments land before reading
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut buffer = ByteBuffer::new();
        let n = read_some(&server, &mut buffer, 4).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(buffer.as_slice(), b"0123");
    }

    #[tokio::test]
    async fn test_write_all_and_shutdown() {
        let (mut client, server) = pair().await;
        write_all(&server, b"hello").await.unwrap();
        shutdown_both(&server).unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }
}
