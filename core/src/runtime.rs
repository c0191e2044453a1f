//! The runtime model defines the interface to adapt various async runtimes.
//!
//! The adaptor is provided as a sub-crate:
//!
//! - [weft-rpc-tokio](https://docs.rs/weft-rpc-tokio)
//!
//! The transport only consumes task spawning and timers; connection
//! readiness is the business of the [Connection](crate::io::Connection)
//! implementation.

use crate::io::Cancellable;
use std::future::Future;
use std::time::Duration;

/// Defines the interface we used from async runtime
pub trait AsyncIO: Send + Sync + 'static {
    /// Spawn a detached background task.
    fn spawn_detach<F>(f: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    fn sleep(d: Duration) -> impl Future + Send;

    /// Run `func` under a deadline, Err(()) when the deadline hits first.
    #[inline]
    fn timeout<F>(d: Duration, func: F) -> impl Future<Output = Result<F::Output, ()>> + Send
    where
        F: Future + Send,
    {
        Cancellable::new(func, Self::sleep(d))
    }
}
