//! Server endpoint: accepts inbound streams and hosts the service glue
//! entry point.

use crate::error::StreamErr;
use crate::proto::{self, Metadata};
use crate::service::MethodDirectory;
use crate::stream::Stream;
use crate::transport::{Transport, TransportKind};
use std::future::Future;
use std::sync::Arc;
use weft_rpc_core::TransportConfig;
use weft_rpc_core::io::Connection;
use weft_rpc_core::runtime::AsyncIO;

/// Server side of one connection.
pub struct Server<IO: AsyncIO> {
    trans: Transport<IO>,
}

impl<IO: AsyncIO> Server<IO> {
    pub fn new<C: Connection>(
        conn: C, sinfo: Arc<dyn MethodDirectory>, config: TransportConfig,
    ) -> Self {
        Self { trans: Transport::new(TransportKind::Server, conn, sinfo, config) }
    }

    /// Wait for the next inbound stream. Returns Eof once the transport is
    /// closed and the accept queue is drained.
    pub async fn accept_stream(&self) -> Result<Arc<Stream>, StreamErr> {
        self.trans.read_stream().await
    }

    #[inline]
    pub fn available(&self) -> bool {
        self.trans.available()
    }

    #[inline]
    pub fn close(&self) {
        self.trans.close();
    }
}

impl<IO: AsyncIO> Drop for Server<IO> {
    fn drop(&mut self) {
        self.trans.close();
    }
}

/// Entry point for generated service glue: run `handler` on an accepted
/// stream, then guarantee the server half-close whatever the outcome.
///
/// On handler success an empty trailer goes out; on error the trailer
/// carries the kind in `biz-status`. The close callback accounting of the
/// stream fires through the same path, so it runs exactly once per stream.
pub async fn invoke_stream<H, FH>(stream: Arc<Stream>, handler: H) -> Result<(), StreamErr>
where
    H: FnOnce(Arc<Stream>) -> FH,
    FH: Future<Output = Result<(), StreamErr>> + Send,
{
    match handler(stream.clone()).await {
        Ok(()) => stream.close_send(Metadata::new()).await,
        Err(e) => {
            let mut md = Metadata::new();
            md.insert(proto::META_STATUS, e.as_ref());
            let _ = stream.close_send(md).await;
            Err(e)
        }
    }
}
