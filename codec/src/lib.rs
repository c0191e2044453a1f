//! # weft-rpc-codec
//!
//! Payload codecs for `weft-rpc`, implementing the
//! [Codec](weft_rpc_core::Codec) contract of `weft-rpc-core`.

pub use weft_rpc_core::Codec;

mod msgpack;
pub use msgpack::MsgpCodec;
