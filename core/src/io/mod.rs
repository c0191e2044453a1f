//! I/O seams of the transport: byte-level traits, buffered wrappers, and the
//! cancellable I/O future.

use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::*;

mod buf_io;
pub use buf_io::{AsyncBufRead, AsyncBufWrite, AsyncRead, AsyncWrite};

pin_project! {
    /// Cancellable accepts a param `future` for I/O,
    /// abort the I/O waiting when `cancel_future` returns.
    ///
    /// The `cancel_future` can be timer or notification channel recv()
    pub struct Cancellable<F, C> {
        #[pin]
        future: F,
        #[pin]
        cancel_future: C,
    }
}

impl<F: Future + Send, C: Future + Send> Cancellable<F, C> {
    pub fn new(future: F, cancel_future: C) -> Self {
        Self { future, cancel_future }
    }
}

impl<F: Future + Send, C: Future + Send> Future for Cancellable<F, C> {
    type Output = Result<F::Output, ()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _self = self.project();
        if let Poll::Ready(output) = _self.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }
        if let Poll::Ready(_) = _self.cancel_future.poll(cx) {
            return Poll::Ready(Err(()));
        }
        return Poll::Pending;
    }
}

/// A ready byte-duplex connection handed to the transport.
///
/// The transport splits it once at construction; each half is then driven by
/// exactly one background loop. Dropping both halves releases the
/// connection.
pub trait Connection: Send + Sized + 'static {
    type Reader: AsyncRead + Send + 'static;
    type Writer: AsyncWrite + Send + 'static;

    fn split(self) -> (Self::Reader, Self::Writer);

    fn local_addr(&self) -> String;

    fn peer_addr(&self) -> String;
}
