use std::future::Future;
use std::{fmt, io};

/// AsyncRead trait for runtime adapter
pub trait AsyncRead: Send {
    /// Async version of read function
    ///
    /// On ok, return the bytes read
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Read the exact number of bytes required to fill `buf`.
    ///
    /// This function repeatedly calls `read` until the buffer is completely filled.
    ///
    /// # Errors
    ///
    /// This function will return an error if the stream is closed before the
    /// buffer is filled.
    fn read_exact<'a>(
        &'a mut self, mut buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move {
            while !buf.is_empty() {
                match self.read(buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let tmp = buf;
                        buf = &mut tmp[n..];
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            if !buf.is_empty() {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill whole buffer"))
            } else {
                Ok(())
            }
        }
    }
}

/// AsyncWrite trait for runtime adapter
pub trait AsyncWrite: Send {
    /// Async version of write function
    ///
    /// On ok, return the bytes written
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write the entire buffer `buf`.
    ///
    /// This function repeatedly calls `write` until the entire buffer is written.
    ///
    /// # Errors
    ///
    /// This function will return an error if the stream is closed before the
    /// entire buffer is written.
    fn write_all<'a>(
        &'a mut self, mut buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move {
            while !buf.is_empty() {
                match self.write(buf).await {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "failed to write whole buffer",
                        ));
                    }
                    Ok(n) => {
                        buf = &buf[n..];
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
    }
}

/// A buffered reader that owns the read half of a connection.
pub struct AsyncBufRead<R: AsyncRead> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    cap: usize,
}

impl<R: AsyncRead> AsyncBufRead<R> {
    /// Creates a new `AsyncBufRead` with the given reader and buffer capacity.
    #[inline]
    pub fn new(inner: R, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity {} must > 0", capacity);
        AsyncBufRead { inner, buf: vec![0; capacity], pos: 0, cap: 0 }
    }

    #[inline]
    async fn read_buffered(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // If we have bytes in our buffer, copy them to `buf`.
        if self.pos < self.cap {
            let n = std::cmp::min(buf.len(), self.cap - self.pos);
            buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        // If the request is larger than our buffer, read directly into `buf`.
        // This avoids extra copying.
        if buf.len() >= self.buf.len() {
            return self.inner.read(buf).await;
        }

        // Otherwise, fill our buffer and then copy to `buf`.
        self.cap = self.inner.read(&mut self.buf).await?;
        self.pos = 0;
        let n = std::cmp::min(buf.len(), self.cap);
        buf[..n].copy_from_slice(&self.buf[..n]);
        self.pos += n;
        Ok(n)
    }

    #[inline(always)]
    pub fn get_inner(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: AsyncRead + fmt::Debug> fmt::Debug for AsyncBufRead<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<R: AsyncRead> AsyncRead for AsyncBufRead<R> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move { self.read_buffered(buf).await }
    }
}

/// A buffered writer that owns the write half of a connection.
pub struct AsyncBufWrite<W: AsyncWrite> {
    inner: W,
    buf: Vec<u8>,
    pos: usize,
}

impl<W: AsyncWrite> AsyncBufWrite<W> {
    /// Creates a new `AsyncBufWrite` with the given writer and buffer capacity.
    #[inline]
    pub fn new(inner: W, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity {} must > 0", capacity);
        AsyncBufWrite { inner, buf: vec![0; capacity], pos: 0 }
    }

    /// Flushes the buffered data to the underlying writer.
    #[inline]
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            let pos = self.pos;
            self.inner.write_all(&self.buf[..pos]).await?;
            self.pos = 0;
        }
        Ok(())
    }

    #[inline]
    async fn write_buffered(&mut self, buf: &[u8]) -> io::Result<usize> {
        // If the incoming buffer is larger than our internal buffer's capacity,
        // flush our buffer and write the incoming buffer directly.
        if buf.len() >= self.buf.len() {
            self.flush().await?;
            return self.inner.write(buf).await;
        }

        // If the incoming buffer doesn't fit in the remaining space in our buffer,
        // flush our buffer.
        if self.buf.len() - self.pos < buf.len() {
            self.flush().await?;
        }
        // Copy the incoming buffer into our internal buffer.
        let n = buf.len();
        self.buf[self.pos..self.pos + n].copy_from_slice(buf);
        self.pos += n;
        Ok(n)
    }

    #[inline(always)]
    pub fn get_inner(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: AsyncWrite + fmt::Debug> fmt::Debug for AsyncBufWrite<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl<W: AsyncWrite> AsyncWrite for AsyncBufWrite<W> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move { self.write_buffered(buf).await }
    }
}
