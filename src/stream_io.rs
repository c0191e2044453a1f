//! Per-stream receive buffer and half-close accounting.
//!
//! One producer (the transport reader loop) hands payloads to one consumer
//! (the application recv path) with exact error propagation. Two events feed
//! the close accounting, the local send-close and the remote trailer; when
//! both have been seen the close callback fires, at most once.

use crate::error::StreamErr;
use crate::pipe::Pipe;
use crate::stream::Stream;
use io_buffer::Buffer;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type CloseCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// One message from the reader loop: a payload, or an exception to latch.
pub(crate) type StreamMsg = Result<Buffer, StreamErr>;

pub(crate) struct StreamIo {
    stream: Weak<Stream>,
    pipe: Pipe<StreamMsg>,
    /// Latched terminal state of the consumer side; once set, every further
    /// output returns it.
    exception: Mutex<Option<StreamErr>>,
    eof_flag: AtomicU8,
    callback_fired: AtomicBool,
    close_callback: Mutex<Option<CloseCallback>>,
}

impl StreamIo {
    pub(crate) fn new(stream: Weak<Stream>) -> Self {
        Self {
            stream,
            pipe: Pipe::new(),
            exception: Mutex::new(None),
            eof_flag: AtomicU8::new(0),
            callback_fired: AtomicBool::new(false),
            close_callback: Mutex::new(None),
        }
    }

    pub(crate) fn stream(&self) -> Option<Arc<Stream>> {
        self.stream.upgrade()
    }

    pub(crate) fn set_close_callback(&self, cb: CloseCallback) {
        self.close_callback.lock().unwrap().replace(cb);
    }

    /// Reader-loop side: enqueue one message. A terminal pipe means the
    /// stream went away under us, the frame is logged and dropped.
    pub(crate) fn input(&self, msg: StreamMsg) {
        if let Err(e) = self.pipe.write(msg) {
            warn!("stream io: dropping inbound message on {} pipe", e);
        }
    }

    /// Consumer side: take exactly one payload.
    ///
    /// Cancellation is reported once, then collapses into the Eof latch so
    /// subsequent calls are idempotent terminal.
    pub(crate) async fn output(&self) -> Result<Buffer, StreamErr> {
        if let Some(e) = *self.exception.lock().unwrap() {
            return Err(e);
        }
        match self.pipe.recv().await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => {
                self.latch(e);
                Err(e)
            }
            Err(StreamErr::Cancelled) => {
                self.latch(StreamErr::Eof);
                Err(StreamErr::Cancelled)
            }
            Err(_) => {
                self.latch(StreamErr::Eof);
                Err(StreamErr::Eof)
            }
        }
    }

    #[inline]
    fn latch(&self, e: StreamErr) {
        self.exception.lock().unwrap().get_or_insert(e);
    }

    /// Remote half-close: the peer's trailer arrived. Readers drain what is
    /// queued, then observe Eof.
    pub(crate) fn close_recv(&self) {
        self.pipe.close();
        self.half_closed();
    }

    /// Local half-close: our trailer went out.
    pub(crate) fn close_send(&self) {
        self.half_closed();
    }

    #[inline]
    fn half_closed(&self) {
        // saturates at 2: each half reports at most once
        if self.eof_flag.fetch_add(1, Ordering::AcqRel) + 1 == 2 {
            self.fire_callback();
        }
    }

    /// Full close from transport teardown.
    pub(crate) fn close(&self) {
        self.pipe.close();
        self.fire_callback();
    }

    /// Local abort: discard queued payloads, unblock the reader at once,
    /// and collapse further accounting to a no-op.
    pub(crate) fn cancel(&self) {
        self.pipe.cancel();
        self.fire_callback();
    }

    fn fire_callback(&self) {
        if self
            .callback_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(cb) = self.close_callback.lock().unwrap().take() {
                cb();
            }
        }
    }
}
