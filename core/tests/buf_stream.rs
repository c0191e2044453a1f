use futures::executor::block_on;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use weft_rpc_core::io::*;

// A mock stream for read operations only, handing out data in fixed chunks
struct MockReadStream {
    chunks: Vec<Vec<u8>>,
}

impl MockReadStream {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }
}

impl AsyncRead for MockReadStream {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            let n = std::cmp::min(buf.len(), chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.insert(0, chunk[n..].to_vec());
            }
            Ok(n)
        }
    }
}

// A mock stream recording writes, one syscall-sized slice at a time
struct MockWriteStream {
    sink: Arc<Mutex<Vec<u8>>>,
    max_write: usize,
}

impl AsyncWrite for MockWriteStream {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        let n = std::cmp::min(buf.len(), self.max_write);
        self.sink.lock().unwrap().extend_from_slice(&buf[..n]);
        async move { Ok(n) }
    }
}

#[test]
fn test_buf_read_small_chunks() {
    let data: Vec<u8> = (0..200u8).collect();
    let chunks: Vec<Vec<u8>> = data.chunks(7).map(|c| c.to_vec()).collect();
    let mut reader = AsyncBufRead::new(MockReadStream::new(chunks), 16);

    let mut got = vec![0u8; data.len()];
    block_on(reader.read_exact(&mut got)).expect("read_exact");
    assert_eq!(got, data);

    // afterwards only EOF is left
    let mut rest = [0u8; 1];
    let r = block_on(reader.read_exact(&mut rest));
    assert_eq!(r.err().map(|e| e.kind()), Some(io::ErrorKind::UnexpectedEof));
}

#[test]
fn test_buf_read_large_request_bypasses_buffer() {
    let data = vec![3u8; 1024];
    let mut reader = AsyncBufRead::new(MockReadStream::new(vec![data.clone()]), 16);
    let mut got = vec![0u8; 1024];
    // request larger than the internal buffer reads straight through
    let n = block_on(reader.read(&mut got)).expect("read");
    assert_eq!(&got[..n], &data[..n]);
}

#[test]
fn test_buf_write_flush() {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut writer =
        AsyncBufWrite::new(MockWriteStream { sink: sink.clone(), max_write: 5 }, 32);

    block_on(writer.write_all(b"hello ")).expect("write");
    block_on(writer.write_all(b"world")).expect("write");
    // nothing reaches the sink until flush
    assert_eq!(sink.lock().unwrap().len(), 0);
    block_on(writer.flush()).expect("flush");
    assert_eq!(sink.lock().unwrap().as_slice(), b"hello world");
}

#[test]
fn test_buf_write_oversized_passthrough() {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut writer =
        AsyncBufWrite::new(MockWriteStream { sink: sink.clone(), max_write: 1024 }, 8);

    block_on(writer.write_all(b"abc")).expect("write");
    let big = vec![9u8; 64];
    // larger than the internal buffer: flushes, then writes through
    block_on(writer.write_all(&big)).expect("write");
    block_on(writer.flush()).expect("flush");
    let got = sink.lock().unwrap();
    assert_eq!(&got[..3], b"abc");
    assert_eq!(&got[3..], &big[..]);
}

#[test]
fn test_cancellable() {
    let pending = futures::future::pending::<()>();
    let ready = futures::future::ready(7u32);
    assert_eq!(block_on(Cancellable::new(ready, pending)), Ok(7));

    let pending = futures::future::pending::<u32>();
    let ready = futures::future::ready(());
    assert_eq!(block_on(Cancellable::new(pending, ready)), Err(()));

    // both ready: the I/O future wins
    let both = Cancellable::new(futures::future::ready(1u32), futures::future::ready(()));
    assert_eq!(block_on(both), Ok(1));
}
