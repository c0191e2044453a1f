//! Per-stream state machine and the typed send/recv surface.
//!
//! ```text
//!   Idle --send_header/read_header--> Open
//!   Open --send/recv--> Open
//!   Open --close_send--> HalfClosedLocal
//!   Open --read_trailer--> HalfClosedRemote
//!   HalfClosedLocal --read_trailer--> Closed
//!   HalfClosedRemote --close_send--> Closed
//!   any --cancel--> Closed
//! ```
//!
//! Each side of the state is single-writer: the transport reader loop
//! effects the remote transitions, the application effects the local ones,
//! so the two half-close atomics are the only synchronization needed.

use crate::error::StreamErr;
use crate::proto::{self, Frame, Metadata};
use crate::stream_io::{CloseCallback, StreamIo};
use crate::transport::TransportInner;
use crossfire::{MAsyncRx, MTx, mpmc};
use io_buffer::Buffer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use weft_rpc_core::Codec;

/// Interaction shape of one method, provided by the method directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Latch that parks waiters until opened once. Opening is signalled by
/// dropping the sender so every parked recv resolves.
struct Gate {
    tx: Mutex<Option<MTx<()>>>,
    rx: MAsyncRx<()>,
}

impl Gate {
    fn new() -> Self {
        let (tx, rx) = mpmc::unbounded_async::<()>();
        Self { tx: Mutex::new(Some(tx)), rx }
    }

    fn open(&self) {
        self.tx.lock().unwrap().take();
    }

    async fn wait(&self) {
        // resolves with RecvError once every sender is gone
        let _ = self.rx.recv().await;
    }
}

/// A logical, bidirectional message sequence multiplexed on one transport.
///
/// Shared between the application and the transport reader loop; all
/// operations take `&self`.
pub struct Stream {
    sid: i32,
    method: String,
    mode: StreamingMode,
    side: Side,
    header_sent: AtomicBool,
    trailer_sent: AtomicBool,
    send_closed: AtomicBool,
    recv_closed: AtomicBool,
    peer_header: OnceLock<Metadata>,
    peer_trailer: OnceLock<Metadata>,
    peer_meta: Mutex<Option<Metadata>>,
    header_gate: Gate,
    trailer_gate: Gate,
    sio: OnceLock<Arc<StreamIo>>,
    trans: Arc<TransportInner>,
}

impl Stream {
    pub(crate) fn new(
        trans: Arc<TransportInner>, sid: i32, method: String, mode: StreamingMode, side: Side,
    ) -> Arc<Self> {
        let stream = Arc::new(Self {
            sid,
            method,
            mode,
            side,
            header_sent: AtomicBool::new(false),
            trailer_sent: AtomicBool::new(false),
            send_closed: AtomicBool::new(false),
            recv_closed: AtomicBool::new(false),
            peer_header: OnceLock::new(),
            peer_trailer: OnceLock::new(),
            peer_meta: Mutex::new(None),
            header_gate: Gate::new(),
            trailer_gate: Gate::new(),
            sio: OnceLock::new(),
            trans,
        });
        let sio = Arc::new(StreamIo::new(Arc::downgrade(&stream)));
        let _ = stream.sio.set(sio);
        stream
    }

    #[inline]
    pub fn sid(&self) -> i32 {
        self.sid
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub(crate) fn stream_io(&self) -> &Arc<StreamIo> {
        // set right after construction, before the stream is exposed
        self.sio.get().expect("stream io attached")
    }

    /// Register the one-shot close callback of this stream.
    pub fn on_close(&self, cb: CloseCallback) {
        self.stream_io().set_close_callback(cb);
    }

    /// Send our header frame. At most one goes out; once headers are on the
    /// wire (explicitly or through the implicit first-write) this is a no-op
    /// success.
    pub async fn send_header(&self, header: Metadata) -> Result<(), StreamErr> {
        if self.send_closed.load(Ordering::Acquire) {
            return Err(StreamErr::Closed);
        }
        if self.header_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.trans.write_frame(Frame::header(self.sid, &self.method, header)).await
    }

    /// Encode `msg` with the external codec and emit a Data frame.
    ///
    /// Encoding runs here on the caller task so large serializations never
    /// stall the writer loop. Blocks when the write channel is full.
    pub async fn send<C: Codec, T: Serialize>(&self, codec: &C, msg: &T) -> Result<(), StreamErr> {
        if self.send_closed.load(Ordering::Acquire) {
            return Err(StreamErr::Closed);
        }
        if !self.header_sent.load(Ordering::Acquire) {
            self.send_header(Metadata::new()).await?;
        }
        let payload = codec.encode(msg).map_err(|_| StreamErr::Codec)?;
        self.trans.write_frame(Frame::data(self.sid, &self.method, Buffer::from(payload))).await
    }

    /// Take the next payload and decode it with the external codec.
    ///
    /// Returns Eof once the peer's trailer arrived and the buffered payloads
    /// have drained; a codec failure surfaces per-call and leaves the stream
    /// usable.
    pub async fn recv<C, T>(&self, codec: &C) -> Result<T, StreamErr>
    where
        C: Codec,
        T: for<'a> Deserialize<'a>,
    {
        let payload = self.stream_io().output().await?;
        // payload buffer freed on drop, after decode copied what it needs
        codec.decode(payload.as_ref()).map_err(|_| StreamErr::Codec)
    }

    /// Emit our trailer and close the send half. Idempotent.
    pub async fn close_send(&self, trailer: Metadata) -> Result<(), StreamErr> {
        if self.trailer_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if !self.header_sent.swap(true, Ordering::AcqRel) {
            // a trailer may not precede the header on the wire
            self.trans.write_frame(Frame::header(self.sid, &self.method, Metadata::new())).await?;
        }
        let res = self.trans.write_frame(Frame::trailer(self.sid, &self.method, trailer)).await;
        self.send_closed.store(true, Ordering::Release);
        self.stream_io().close_send();
        self.maybe_close();
        res
    }

    /// Local abort: readers unblock immediately with Cancelled, a trailer
    /// with a cancellation marker goes out best-effort, and both halves are
    /// closed.
    pub async fn cancel(&self) {
        self.send_closed.store(true, Ordering::Release);
        self.recv_closed.store(true, Ordering::Release);
        self.stream_io().cancel();
        if !self.trailer_sent.swap(true, Ordering::AcqRel) {
            let mut md = Metadata::new();
            md.insert(proto::META_STATUS, StreamErr::Cancelled.as_ref());
            let _ = self.trans.write_frame(Frame::trailer(self.sid, &self.method, md)).await;
        }
        self.header_gate.open();
        self.trailer_gate.open();
        self.trans.stream_close(self.sid);
    }

    /// Wait for the peer's header.
    pub async fn header(&self) -> Result<Metadata, StreamErr> {
        if let Some(h) = self.peer_header.get() {
            return Ok(h.clone());
        }
        self.header_gate.wait().await;
        self.peer_header.get().cloned().ok_or(StreamErr::Closed)
    }

    /// Wait for the peer's trailer.
    pub async fn trailer(&self) -> Result<Metadata, StreamErr> {
        if let Some(t) = self.peer_trailer.get() {
            return Ok(t.clone());
        }
        self.trailer_gate.wait().await;
        self.peer_trailer.get().cloned().ok_or(StreamErr::Closed)
    }

    /// Sidechannel carried by Meta frames, last one wins.
    pub fn meta(&self) -> Option<Metadata> {
        self.peer_meta.lock().unwrap().clone()
    }

    pub(crate) fn read_header(&self, header: Metadata) {
        let _ = self.peer_header.set(header);
        self.header_gate.open();
    }

    pub(crate) fn read_trailer(&self, trailer: Metadata) {
        if self.recv_closed.swap(true, Ordering::AcqRel) {
            warn!("stream sid={} received a second trailer, ignored", self.sid);
            return;
        }
        let _ = self.peer_trailer.set(trailer);
        // a stream that ends before any header unblocks header() waiters too
        self.header_gate.open();
        self.trailer_gate.open();
        self.stream_io().close_recv();
        self.maybe_close();
    }

    pub(crate) fn read_meta(&self, meta: Metadata) {
        self.peer_meta.lock().unwrap().replace(meta);
    }

    /// Terminal transition: deregister once both halves are closed. Late
    /// frames for the sid are then logged and dropped by the reader loop.
    fn maybe_close(&self) {
        if self.send_closed.load(Ordering::Acquire) && self.recv_closed.load(Ordering::Acquire) {
            self.trans.stream_close(self.sid);
        }
    }

    /// Teardown path used by the transport when the connection dies.
    pub(crate) fn conn_closed(&self) {
        self.send_closed.store(true, Ordering::Release);
        self.recv_closed.store(true, Ordering::Release);
        self.header_gate.open();
        self.trailer_gate.open();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "stream[sid:{}, method:{:?}, mode:{:?}, side:{:?}]",
            self.sid, self.method, self.mode, self.side
        )
    }
}
