//! The per-connection engine: one reader loop, one writer loop, the stream
//! registry, and the bounded write channel that arbitrates sends fairly.
//!
//! Ordering guarantees: frames of a single stream are delivered in emitted
//! order (single writer loop, FIFO channel, single-consumer pipe); across
//! streams the writer may interleave arbitrarily but never splits a frame.

use crate::error::StreamErr;
use crate::pipe::Pipe;
use crate::proto::{self, Frame, FrameType, Metadata};
use crate::service::MethodDirectory;
use crate::stream::{Side, Stream};
use crate::stream_io::{CloseCallback, StreamIo};
use captains_log::LogFilter;
use crossfire::{AsyncRx, MAsyncRx, MAsyncTx, MTx, mpmc, mpsc};
use futures::pin_mut;
use rustc_hash::FxHashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use weft_rpc_core::TransportConfig;
use weft_rpc_core::io::{AsyncBufRead, AsyncBufWrite, AsyncRead, AsyncWrite, Cancellable, Connection};
use weft_rpc_core::runtime::AsyncIO;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Client,
    Server,
}

/// The per-connection transport.
///
/// Exactly one reader loop and one writer loop run between construction and
/// close; producers of sends serialize through the bounded write channel.
pub struct Transport<IO: AsyncIO> {
    inner: Arc<TransportInner>,
    _io: PhantomData<IO>,
}

impl<IO: AsyncIO> Transport<IO> {
    pub fn new<C: Connection>(
        kind: TransportKind, conn: C, sinfo: Arc<dyn MethodDirectory>, config: TransportConfig,
    ) -> Self {
        let conn_desc = format!("{}->{}", conn.local_addr(), conn.peer_addr());
        let (reader, writer) = conn.split();
        let (wchan_tx, wchan_rx) = mpsc::bounded_async::<Frame>(config.write_chan_capacity);
        let (close_tx, close_rx) = mpmc::unbounded_async::<()>();
        let inner = Arc::new(TransportInner {
            kind,
            sinfo,
            config,
            streams: Mutex::new(FxHashMap::default()),
            spipe: Pipe::new(),
            scache: Mutex::new(Vec::new()),
            wchan_tx: Mutex::new(Some(wchan_tx)),
            close_tx: Mutex::new(Some(close_tx)),
            next_sid: AtomicI32::new(1),
            started: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            conn_desc,
            logger: Arc::new(LogFilter::new()),
        });
        logger_debug!(inner.logger, "transport[{:?}] {} starting", kind, inner.conn_desc);
        let _inner = inner.clone();
        IO::spawn_detach(async move {
            let res = loop_read::<_, IO>(&_inner, reader, close_rx).await;
            _inner.on_loop_exit("read", res);
        });
        let _inner = inner.clone();
        IO::spawn_detach(async move {
            let res = loop_write(&_inner, writer, wchan_rx).await;
            _inner.on_loop_exit("write", res);
        });
        Self { inner, _io: PhantomData }
    }

    #[inline]
    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    /// Client side: allocate a sid, register the stream, and put its Header
    /// frame on the wire.
    pub async fn new_stream(
        &self, method: &str, header: Metadata, close_callback: Option<CloseCallback>,
    ) -> Result<Arc<Stream>, StreamErr> {
        self.inner.clone().new_stream(method, header, close_callback).await
    }

    /// Server side: wait for an inbound stream. Returns Eof after close.
    pub async fn read_stream(&self) -> Result<Arc<Stream>, StreamErr> {
        self.inner.read_stream().await
    }

    /// Liveness probe for external pool scavengers.
    #[inline]
    pub fn available(&self) -> bool {
        self.inner.available()
    }

    /// Close the accept pipe and the write channel, then release the
    /// connection. Idempotent; in-flight streams observe Eof.
    pub fn close(&self) {
        logger_debug!(self.inner.logger, "transport {} is closing", self.inner.conn_desc);
        self.inner.shutdown();
    }
}

pub(crate) struct TransportInner {
    kind: TransportKind,
    sinfo: Arc<dyn MethodDirectory>,
    config: TransportConfig,
    streams: Mutex<FxHashMap<i32, Arc<StreamIo>>>,
    /// in-coming stream channel, server only
    spipe: Pipe<Arc<Stream>>,
    scache: Mutex<Vec<Arc<Stream>>>,
    wchan_tx: Mutex<Option<MAsyncTx<Frame>>>,
    close_tx: Mutex<Option<MTx<()>>>,
    next_sid: AtomicI32,
    started: Instant,
    /// millis since `started`, refreshed by the reader loop
    last_active_ms: AtomicU64,
    closed: AtomicBool,
    conn_desc: String,
    logger: Arc<LogFilter>,
}

impl TransportInner {
    #[inline]
    fn touch(&self) {
        self.last_active_ms.store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn available(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let now = self.started.elapsed().as_millis() as u64;
        let idle = now.saturating_sub(self.last_active_ms.load(Ordering::Relaxed));
        idle < self.config.idle_timeout.as_millis() as u64
    }

    fn load_stream_io(&self, sid: i32) -> Option<Arc<StreamIo>> {
        self.streams.lock().unwrap().get(&sid).cloned()
    }

    fn register(&self, stream: &Arc<Stream>) -> Result<(), StreamErr> {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(&stream.sid()) {
            logger_warn!(self.logger, "transport {} sid {} collision", self.conn_desc, stream.sid());
            return Err(StreamErr::Protocol);
        }
        streams.insert(stream.sid(), stream.stream_io().clone());
        Ok(())
    }

    /// Drop the sid→StreamIO mapping; late frames on it are logged and
    /// dropped by the reader loop.
    pub(crate) fn stream_close(&self, sid: i32) {
        self.streams.lock().unwrap().remove(&sid);
    }

    /// Concurrency-safe send path: any number of producers serialize
    /// through the bounded channel, blocking when it is full.
    pub(crate) async fn write_frame(&self, frame: Frame) -> Result<(), StreamErr> {
        let tx = self.wchan_tx.lock().unwrap().clone();
        match tx {
            None => Err(StreamErr::Closed),
            Some(tx) => tx.send(frame).await.map_err(|_| StreamErr::Closed),
        }
    }

    async fn new_stream(
        self: Arc<Self>, method: &str, header: Metadata, close_callback: Option<CloseCallback>,
    ) -> Result<Arc<Stream>, StreamErr> {
        if self.kind != TransportKind::Client {
            return Err(StreamErr::Unavailable);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamErr::Closed);
        }
        let desc = self.sinfo.lookup(method).ok_or(StreamErr::Unavailable)?;
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst);
        if sid <= 0 {
            return Err(StreamErr::Exhausted);
        }
        let stream = Stream::new(self.clone(), sid, method.to_string(), desc.mode, Side::Client);
        if let Some(cb) = close_callback {
            stream.on_close(cb);
        }
        self.register(&stream)?;
        if let Err(e) = stream.send_header(header).await {
            self.stream_close(sid);
            return Err(e);
        }
        Ok(stream)
    }

    async fn read_stream(&self) -> Result<Arc<Stream>, StreamErr> {
        if self.kind != TransportKind::Server {
            return Err(StreamErr::Unavailable);
        }
        loop {
            if let Some(s) = self.scache.lock().unwrap().pop() {
                return Ok(s);
            }
            let mut batch = Vec::with_capacity(self.config.accept_batch_size);
            let n = self.spipe.read(&mut batch, self.config.accept_batch_size).await?;
            debug_assert!(n > 0);
            let mut scache = self.scache.lock().unwrap();
            // popped from the back, so reverse to keep acceptance FIFO
            scache.extend(batch.into_iter().rev());
        }
    }

    /// Header frame on a server transport: a new inbound stream.
    async fn on_accept_header(self: Arc<Self>, fr: Frame) -> Result<(), StreamErr> {
        match self.sinfo.lookup(&fr.method) {
            None => {
                logger_warn!(
                    self.logger,
                    "transport {} unknown method {:?} on sid={}",
                    self.conn_desc,
                    fr.method,
                    fr.sid
                );
                let mut md = Metadata::new();
                md.insert(proto::META_STATUS, StreamErr::Unavailable.as_ref());
                md.insert(proto::META_MESSAGE, format!("unknown method {}", fr.method));
                let _ = self.write_frame(Frame::trailer(fr.sid, &fr.method, md)).await;
                Ok(())
            }
            Some(desc) => {
                let stream =
                    Stream::new(self.clone(), fr.sid, fr.method.clone(), desc.mode, Side::Server);
                stream.read_header(fr.ext);
                self.register(&stream)?;
                if self.spipe.write(stream).is_err() {
                    logger_warn!(
                        self.logger,
                        "transport {} accept pipe closed, dropping stream sid={}",
                        self.conn_desc,
                        fr.sid
                    );
                    self.stream_close(fr.sid);
                }
                Ok(())
            }
        }
    }

    /// Look up the target stream of a frame; a dead or missing mapping
    /// means warn and drop.
    fn dispatch_target(&self, fr: &Frame) -> Option<(Arc<StreamIo>, Arc<Stream>)> {
        let Some(sio) = self.load_stream_io(fr.sid) else {
            logger_warn!(
                self.logger,
                "transport {} dropping {:?} frame on unknown sid={}",
                self.conn_desc,
                fr.typ,
                fr.sid
            );
            return None;
        };
        match sio.stream() {
            Some(stream) => Some((sio, stream)),
            None => {
                // the application let the stream go without closing it
                logger_warn!(
                    self.logger,
                    "transport {} stream sid={} dropped by application, cancelling",
                    self.conn_desc,
                    fr.sid
                );
                sio.cancel();
                self.stream_close(fr.sid);
                None
            }
        }
    }

    /// Idempotent close of the accept pipe, the write channel, and the
    /// reader abort latch. Dropping the latch ends the reader loop, which
    /// releases the connection.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.spipe.close();
        self.wchan_tx.lock().unwrap().take();
        self.close_tx.lock().unwrap().take();
    }

    fn on_loop_exit(&self, which: &str, res: Result<(), StreamErr>) {
        match res {
            Ok(()) | Err(StreamErr::Eof) => {
                logger_debug!(self.logger, "transport {} {} loop exit: EOF", self.conn_desc, which);
            }
            Err(e) => {
                logger_error!(
                    self.logger,
                    "transport {} {} loop exit: {}",
                    self.conn_desc,
                    which,
                    e
                );
            }
        }
        self.shutdown();
        // every in-flight stream observes Eof and its callback fires
        let drained: Vec<Arc<StreamIo>> = {
            let mut streams = self.streams.lock().unwrap();
            streams.drain().map(|(_, sio)| sio).collect()
        };
        for sio in drained {
            if let Some(stream) = sio.stream() {
                stream.conn_closed();
            }
            sio.close();
        }
    }
}

async fn loop_read<R: AsyncRead, IO: AsyncIO>(
    inner: &Arc<TransportInner>, reader: R, close_rx: MAsyncRx<()>,
) -> Result<(), StreamErr> {
    let mut reader = AsyncBufRead::new(reader, inner.config.io_buf_size);
    loop {
        let fr = {
            let decode = proto::decode_frame(&mut reader, inner.config.max_frame_bytes);
            pin_mut!(decode);
            let guarded = Cancellable::new(decode, close_rx.recv());
            match IO::timeout(inner.config.conn_deadline, guarded).await {
                // connection idle past the deadline
                Err(()) => return Err(StreamErr::IO),
                // transport closed locally
                Ok(Err(())) => return Ok(()),
                Ok(Ok(res)) => res?,
            }
        };
        inner.touch();
        logger_trace!(inner.logger, "transport {} read frame {}", inner.conn_desc, fr);
        match fr.typ {
            FrameType::Header => match inner.kind {
                TransportKind::Server => inner.clone().on_accept_header(fr).await?,
                TransportKind::Client => {
                    if let Some((_, stream)) = inner.dispatch_target(&fr) {
                        stream.read_header(fr.ext);
                    }
                }
            },
            FrameType::Data => {
                if let Some((sio, _)) = inner.dispatch_target(&fr) {
                    sio.input(Ok(fr.payload));
                }
            }
            FrameType::Trailer => {
                if let Some((_, stream)) = inner.dispatch_target(&fr) {
                    stream.read_trailer(fr.ext);
                }
            }
            FrameType::Meta => {
                if let Some((_, stream)) = inner.dispatch_target(&fr) {
                    stream.read_meta(fr.ext);
                }
            }
        }
    }
}

async fn loop_write<W: AsyncWrite>(
    inner: &Arc<TransportInner>, writer: W, wchan_rx: AsyncRx<Frame>,
) -> Result<(), StreamErr> {
    let mut writer = AsyncBufWrite::new(writer, inner.config.io_buf_size);
    loop {
        let frame = match wchan_rx.recv().await {
            Ok(frame) => frame,
            Err(_) => {
                // channel closed: flush what is buffered and exit clean
                let _ = writer.flush().await;
                return Ok(());
            }
        };
        proto::encode_frame(&mut writer, &frame, inner.config.max_frame_bytes).await?;
        while let Ok(next) = wchan_rx.try_recv() {
            proto::encode_frame(&mut writer, &next, inner.config.max_frame_bytes).await?;
        }
        writer.flush().await?;
    }
}
