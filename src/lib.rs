#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # weft-rpc
//!
//! This crate is the core of a bidirectional, multiplexed streaming RPC
//! transport layered over a single byte-oriented connection. Many concurrent
//! logical streams share one connection, each carrying a typed
//! request/response sequence framed into a small set of control and data
//! frames, under every interaction mode: unary, client-streaming,
//! server-streaming and bidirectional.
//!
//! ## Components
//!
//! `weft-rpc` is built from a collection of crates that provide different
//! functionalities:
//!
//! - [`weft-rpc-core`](https://docs.rs/weft-rpc-core): error taxonomy,
//!   configuration, payload codec contract, IO and runtime seams
//! - [`weft-rpc-codec`](https://docs.rs/weft-rpc-codec): payload codecs,
//!   such as `msgpack`
//! - [`weft-rpc-tokio`](https://docs.rs/weft-rpc-tokio): the tokio runtime
//!   adaptor and its connection types
//!
//! ## Shape
//!
//! Each connection gets one [Transport](transport::Transport) with exactly
//! two background loops: a reader that decodes frames and demultiplexes
//! them by stream id, and a writer that drains a bounded frame channel.
//! Producers of sends serialize through that channel, which is also the
//! only backpressure point. A [Stream](stream::Stream) owns its half-close
//! state; the hand-off from the reader loop to the consumer goes through a
//! [Pipe](pipe::Pipe) with close/cancel/EOF signalling.
//!
//! ## Usage
//!
//! 1. Choose your async runtime adaptor and the payload codec.
//! 2. Establish a byte-duplex connection and wrap it in the adaptor's
//!    [Connection](weft_rpc_core::io::Connection) type.
//! 3. Provide a [MethodDirectory](service::MethodDirectory) mapping method
//!    names to their streaming mode.
//! 4. Client side: [Client::open_stream](client::Client::open_stream), then
//!    `send`/`recv`/`close_send` on the stream.
//! 5. Server side: [Server::accept_stream](server::Server::accept_stream),
//!    then run your handler under [invoke_stream](server::invoke_stream).

#[macro_use]
extern crate captains_log;

pub mod client;
pub mod pipe;
pub mod proto;
pub mod server;
pub mod service;
pub mod stream;
mod stream_io;
pub mod transport;

pub use weft_rpc_core::{Codec, TransportConfig, error, io, runtime};

pub use client::{CallOptions, Client};
pub use error::StreamErr;
pub use proto::{Frame, FrameType, Metadata};
pub use server::{Server, invoke_stream};
pub use service::{MethodDesc, MethodDirectory, StaticDirectory};
pub use stream::{Side, Stream, StreamingMode};
pub use stream_io::CloseCallback;
pub use transport::{Transport, TransportKind};
