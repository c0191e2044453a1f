//! Client endpoint: an owned handle that opens streams on one connection.

use crate::error::StreamErr;
use crate::proto::Metadata;
use crate::service::MethodDirectory;
use crate::stream::Stream;
use crate::stream_io::CloseCallback;
use crate::transport::{Transport, TransportKind};
use std::sync::Arc;
use weft_rpc_core::TransportConfig;
use weft_rpc_core::io::Connection;
use weft_rpc_core::runtime::AsyncIO;

/// Per-call hooks threaded into stream creation, an explicit parameter
/// rather than context-keyed state.
#[derive(Default)]
pub struct CallOptions {
    pub(crate) close_callback: Option<CloseCallback>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `cb` exactly once when both halves of the stream have closed,
    /// or when it is cancelled.
    pub fn on_close(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.close_callback = Some(Box::new(cb));
        self
    }
}

/// An owned handle to one client connection.
///
/// Dropping the handle closes the transport, so a client that escapes
/// application references releases the connection deterministically instead
/// of waiting for a finalizer that never runs. Long-lived holders should
/// still call [close](Client::close) explicitly.
pub struct Client<IO: AsyncIO> {
    trans: Transport<IO>,
}

impl<IO: AsyncIO> Client<IO> {
    pub fn new<C: Connection>(
        conn: C, sinfo: Arc<dyn MethodDirectory>, config: TransportConfig,
    ) -> Self {
        Self { trans: Transport::new(TransportKind::Client, conn, sinfo, config) }
    }

    /// Open a stream on `method`, sending its Header frame with `header`.
    ///
    /// The sid is allocated from the per-connection counter; when it
    /// overflows the call fails with Exhausted and the connection should be
    /// replaced.
    pub async fn open_stream(
        &self, method: &str, header: Metadata, opts: CallOptions,
    ) -> Result<Arc<Stream>, StreamErr> {
        self.trans.new_stream(method, header, opts.close_callback).await
    }

    /// Liveness probe for pool scavengers.
    #[inline]
    pub fn available(&self) -> bool {
        self.trans.available()
    }

    #[inline]
    pub fn close(&self) {
        self.trans.close();
    }
}

impl<IO: AsyncIO> Drop for Client<IO> {
    fn drop(&mut self) {
        self.trans.close();
    }
}
