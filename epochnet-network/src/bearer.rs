//! Length-prefixed framing of messages over a byte stream
//!
//! Each frame is a `u32` little-endian payload length followed by the
//! payload, one encoded message per frame.

use std::{net::SocketAddr, time::Duration};

use byteorder::{ByteOrder as _, LittleEndian};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    net::{tcp, TcpListener, TcpStream, ToSocketAddrs},
    select,
};

type IOResult<T> = tokio::io::Result<T>;

const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bearer I/O error")]
    BearerIo(#[from] tokio::io::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

/// Reads one frame, refusing to allocate for lengths over `max_len`
///
/// Returns `None` when the stream is closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(tokio::io::Error::from(tokio::io::ErrorKind::UnexpectedEof).into()),
            n => filled += n,
        }
    }

    let len = LittleEndian::read_u32(&header) as usize;

    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    LittleEndian::write_u32(&mut header, payload.len() as u32);

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;

    Ok(())
}

pub struct Bearer(TcpStream);

impl Bearer {
    fn configure_tcp(stream: &TcpStream) -> IOResult<()> {
        let sock_ref = socket2::SockRef::from(stream);
        let tcp_keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(20));
        sock_ref.set_tcp_keepalive(&tcp_keepalive)?;
        sock_ref.set_tcp_nodelay(true)?;

        Ok(())
    }

    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> IOResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::configure_tcp(&stream)?;
        Ok(Self(stream))
    }

    pub async fn connect_tcp_timeout(addr: impl ToSocketAddrs, timeout: Duration) -> IOResult<Self> {
        select! {
            result = Self::connect_tcp(addr) => result,
            _ = tokio::time::sleep(timeout) => Err(tokio::io::Error::new(tokio::io::ErrorKind::TimedOut, "connect timeout")),
        }
    }

    pub async fn accept_tcp(listener: &TcpListener) -> IOResult<(Self, SocketAddr)> {
        let (stream, addr) = listener.accept().await?;
        Self::configure_tcp(&stream)?;
        Ok((Self(stream), addr))
    }

    pub fn peer_addr(&self) -> IOResult<SocketAddr> {
        self.0.peer_addr()
    }

    pub fn into_split(self) -> (BearerReadHalf, BearerWriteHalf) {
        let (r, w) = self.0.into_split();
        (BearerReadHalf(r), BearerWriteHalf(w))
    }
}

pub struct BearerReadHalf(tcp::OwnedReadHalf);

impl BearerReadHalf {
    pub async fn read_frame(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, Error> {
        read_frame(&mut self.0, max_len).await
    }
}

pub struct BearerWriteHalf(tcp::OwnedWriteHalf);

impl BearerWriteHalf {
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        write_frame(&mut self.0, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);

        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, 16).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut b, 16).await.unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut b, 16).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused_before_reading_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);

        // only the header is ever written
        a.write_all(&[0xff, 0xff, 0xff, 0x7f]).await.unwrap();

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            Error::FrameTooLarge {
                len: 0x7fff_ffff,
                max: 1024
            }
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_an_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_all(&[8, 0, 0, 0, 1, 2]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, Error::BearerIo(_)));
    }

    #[tokio::test]
    async fn truncated_header_is_an_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_all(&[8, 0]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            Error::BearerIo(ref x) if x.kind() == tokio::io::ErrorKind::UnexpectedEof
        ));
    }
}
