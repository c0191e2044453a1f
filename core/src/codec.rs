use serde::{Deserialize, Serialize};

/*
 *  The transport treats payloads as opaque bytes; only the stream send/recv
 *  paths call into the codec, on the producer/consumer task. Whatever the
 *  serde impl writes into is up to the codec implementation.
 */

/// Interface for payload serialization, see [weft-rpc-codec](https://docs.rs/weft-rpc-codec)
///
/// The codec is immutable, if need changing (like setting up cipher), should
/// have inner mutability
pub trait Codec: Default + Send + Sync + Sized + 'static {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, ()>;

    fn decode<'a, T: Deserialize<'a>>(&self, buf: &'a [u8]) -> Result<T, ()>;
}
