//! Tokio adaptor for `weft-rpc`: the [AsyncIO] runtime hooks plus
//! [Connection](weft_rpc_core::io::Connection) implementations for any tokio
//! byte stream (TCP, unix socket, in-memory duplex).

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use weft_rpc_core::io::{AsyncRead, AsyncWrite, Connection};
use weft_rpc_core::runtime::AsyncIO;

pub struct TokioRT();

impl AsyncIO for TokioRT {
    #[inline(always)]
    fn spawn_detach<F>(f: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let _ = tokio::spawn(f);
    }

    #[inline(always)]
    fn sleep(d: Duration) -> impl Future + Send {
        tokio::time::sleep(d)
    }
}

/// Byte-duplex connection over any tokio stream.
///
/// The address strings are captured at construction because split halves no
/// longer expose them.
pub struct TokioConn<T> {
    stream: T,
    local: String,
    peer: String,
}

impl<T> TokioConn<T> {
    pub fn new(stream: T, local: &str, peer: &str) -> Self {
        Self { stream, local: local.to_string(), peer: peer.to_string() }
    }
}

impl TokioConn<tokio::net::TcpStream> {
    pub fn from_tcp(stream: tokio::net::TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?.to_string();
        let peer = stream.peer_addr()?.to_string();
        Ok(Self { stream, local, peer })
    }

    pub async fn connect(addr: &str) -> io::Result<Self> {
        Self::from_tcp(tokio::net::TcpStream::connect(addr).await?)
    }
}

impl<T> Connection for TokioConn<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    type Reader = TokioReader<T>;
    type Writer = TokioWriter<T>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (r, w) = tokio::io::split(self.stream);
        (TokioReader(r), TokioWriter(w))
    }

    #[inline]
    fn local_addr(&self) -> String {
        self.local.clone()
    }

    #[inline]
    fn peer_addr(&self) -> String {
        self.peer.clone()
    }
}

pub struct TokioReader<T>(ReadHalf<T>);

impl<T: tokio::io::AsyncRead + Send> AsyncRead for TokioReader<T> {
    #[inline(always)]
    fn read<'a, 'b>(&'a mut self, buf: &'b mut [u8]) -> impl Future<Output = io::Result<usize>> + Send + use<'a, 'b, T> {
        async move { self.0.read(buf).await }
    }
}

pub struct TokioWriter<T>(WriteHalf<T>);

impl<T: tokio::io::AsyncWrite + Send> AsyncWrite for TokioWriter<T> {
    #[inline(always)]
    fn write<'a, 'b>(&'a mut self, buf: &'b [u8]) -> impl Future<Output = io::Result<usize>> + Send + use<'a, 'b, T> {
        async move { self.0.write(buf).await }
    }
}

/// In-memory duplex pair, mainly for tests and loopback wiring.
///
/// `buf_size` bounds each direction independently, which makes it handy for
/// forcing backpressure in tests.
pub fn duplex_pair(
    buf_size: usize,
) -> (TokioConn<tokio::io::DuplexStream>, TokioConn<tokio::io::DuplexStream>) {
    let (a, b) = tokio::io::duplex(buf_size);
    (TokioConn::new(a, "duplex:a", "duplex:b"), TokioConn::new(b, "duplex:b", "duplex:a"))
}
