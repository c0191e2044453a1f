//! Unbounded FIFO hand-off with close and cancel, the bridge between the
//! transport reader loop and one consumer task.

use crate::error::StreamErr;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll, Waker};

#[derive(Clone, Copy, PartialEq)]
enum State {
    Open,
    /// Terminal; readers drain the queue, then observe Eof
    Closed,
    /// Terminal; queued items are dropped, readers observe Cancelled at once
    Cancelled,
}

struct Shared<T> {
    queue: VecDeque<T>,
    state: State,
    reader: Option<Waker>,
}

/// Single-consumer pipe: any task may `write`, exactly one task at a time
/// may be parked in `recv`/`read`.
///
/// Writes never reorder; a reader that finds items ready takes as many as
/// are present without waiting again.
pub struct Pipe<T> {
    shared: Mutex<Shared<T>>,
}

impl<T> Pipe<T> {
    pub fn new() -> Self {
        Self { shared: Mutex::new(Shared { queue: VecDeque::new(), state: State::Open, reader: None }) }
    }

    /// Non-blocking append; wakes the parked reader.
    ///
    /// Fails only once the pipe is terminal.
    pub fn write(&self, item: T) -> Result<(), StreamErr> {
        let mut shared = self.shared.lock().unwrap();
        match shared.state {
            State::Open => {
                shared.queue.push_back(item);
                if let Some(waker) = shared.reader.take() {
                    drop(shared);
                    waker.wake();
                }
                Ok(())
            }
            State::Closed => Err(StreamErr::Closed),
            State::Cancelled => Err(StreamErr::Cancelled),
        }
    }

    /// Mark closed; readers drain the remaining items, then observe Eof.
    pub fn close(&self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state == State::Open {
            shared.state = State::Closed;
        }
        if let Some(waker) = shared.reader.take() {
            drop(shared);
            waker.wake();
        }
    }

    /// Mark cancelled and discard queued items; readers observe Cancelled
    /// immediately, even when they were draining a closed pipe.
    pub fn cancel(&self) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state != State::Cancelled {
            shared.state = State::Cancelled;
            shared.queue.clear();
        }
        if let Some(waker) = shared.reader.take() {
            drop(shared);
            waker.wake();
        }
    }

    /// Take one item, waiting while the pipe is empty and open.
    #[inline]
    pub fn recv(&self) -> Recv<'_, T> {
        Recv { pipe: self }
    }

    /// Append up to `max` items to `batch`, waiting only while the pipe is
    /// empty and open. Resolves with the count taken, at least 1.
    #[inline]
    pub fn read<'a>(&'a self, batch: &'a mut Vec<T>, max: usize) -> ReadBatch<'a, T> {
        ReadBatch { pipe: self, batch, max }
    }

    fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<T, StreamErr>> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(item) = shared.queue.pop_front() {
            return Poll::Ready(Ok(item));
        }
        match shared.state {
            State::Closed => Poll::Ready(Err(StreamErr::Eof)),
            State::Cancelled => Poll::Ready(Err(StreamErr::Cancelled)),
            State::Open => {
                shared.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn poll_read(
        &self, cx: &mut Context<'_>, batch: &mut Vec<T>, max: usize,
    ) -> Poll<Result<usize, StreamErr>> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.queue.is_empty() {
            let mut n = 0;
            while n < max {
                match shared.queue.pop_front() {
                    Some(item) => {
                        batch.push(item);
                        n += 1;
                    }
                    None => break,
                }
            }
            return Poll::Ready(Ok(n));
        }
        match shared.state {
            State::Closed => Poll::Ready(Err(StreamErr::Eof)),
            State::Cancelled => Poll::Ready(Err(StreamErr::Cancelled)),
            State::Open => {
                shared.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

pub struct Recv<'a, T> {
    pipe: &'a Pipe<T>,
}

impl<'a, T> Future for Recv<'a, T> {
    type Output = Result<T, StreamErr>;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.pipe.poll_recv(cx)
    }
}

pub struct ReadBatch<'a, T> {
    pipe: &'a Pipe<T>,
    batch: &'a mut Vec<T>,
    max: usize,
}

impl<'a, T> Future for ReadBatch<'a, T> {
    type Output = Result<usize, StreamErr>;

    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _self = self.get_mut();
        _self.pipe.poll_read(cx, _self.batch, _self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_write_close_drain() {
        let pipe = Pipe::new();
        for i in 0..5u32 {
            pipe.write(i).expect("write");
        }
        pipe.close();
        assert_eq!(pipe.write(9), Err(StreamErr::Closed));
        for i in 0..5u32 {
            assert_eq!(block_on(pipe.recv()), Ok(i));
        }
        assert_eq!(block_on(pipe.recv()), Err(StreamErr::Eof));
        // terminal and idempotent
        assert_eq!(block_on(pipe.recv()), Err(StreamErr::Eof));
    }

    #[test]
    fn test_cancel_discards_queue() {
        let pipe = Pipe::new();
        for i in 0..5u32 {
            pipe.write(i).expect("write");
        }
        pipe.cancel();
        assert_eq!(block_on(pipe.recv()), Err(StreamErr::Cancelled));
        assert_eq!(pipe.write(9), Err(StreamErr::Cancelled));
    }

    #[test]
    fn test_cancel_after_close_still_discards() {
        let pipe = Pipe::new();
        pipe.write(1u32).expect("write");
        pipe.close();
        pipe.cancel();
        assert_eq!(block_on(pipe.recv()), Err(StreamErr::Cancelled));
    }

    #[test]
    fn test_batch_read() {
        let pipe = Pipe::new();
        for i in 0..10u32 {
            pipe.write(i).expect("write");
        }
        let mut batch = Vec::new();
        let n = block_on(pipe.read(&mut batch, 4)).expect("read");
        assert_eq!(n, 4);
        assert_eq!(batch, vec![0, 1, 2, 3]);
        batch.clear();
        let n = block_on(pipe.read(&mut batch, 32)).expect("read");
        assert_eq!(n, 6);
        assert_eq!(batch, vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let pipe = Arc::new(Pipe::new());
        let _pipe = pipe.clone();
        let handle = std::thread::spawn(move || block_on(_pipe.recv()));
        std::thread::sleep(Duration::from_millis(50));
        pipe.write(42u32).expect("write");
        assert_eq!(handle.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_blocking_read_wakes_on_cancel() {
        let pipe = Arc::new(Pipe::<u32>::new());
        let _pipe = pipe.clone();
        let handle = std::thread::spawn(move || block_on(_pipe.recv()));
        std::thread::sleep(Duration::from_millis(50));
        pipe.cancel();
        assert_eq!(handle.join().unwrap(), Err(StreamErr::Cancelled));
    }
}
