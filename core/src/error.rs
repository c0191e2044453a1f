use std::fmt;

/// "stream_" prefix is reserved for errors raised by the transport itself
pub const STREAM_ERR_PREFIX: &'static str = "stream_";

/// Internal error kinds of the streaming transport.
///
/// The strum strings are wire-stable: trailer frames carry them in the
/// `biz-status` ext entry and the peer parses them back with `from_str`.
///
/// Propagation policy:
/// - [Codec](StreamErr::Codec) and [Unavailable](StreamErr::Unavailable)
///   surface per-call, the transport stays alive.
/// - [Protocol](StreamErr::Protocol) and [IO](StreamErr::IO) tear down the
///   connection; per-stream calls then surface `Eof` or `Closed`.
/// - [Cancelled](StreamErr::Cancelled) surfaces per-call and is
///   distinguishable from `Eof`.
#[derive(
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    PartialEq,
    Eq,
    PartialOrd,
    Clone,
    Copy,
    thiserror::Error,
)]
#[repr(u8)]
pub enum StreamErr {
    /// Expected end of a stream or of the connection
    #[strum(serialize = "stream_eof")]
    Eof = 0,
    /// Local cancellation, observed at most once before the Eof latch
    #[strum(serialize = "stream_cancelled")]
    Cancelled = 1,
    /// Operation attempted on a closed stream or transport
    #[strum(serialize = "stream_closed")]
    Closed = 2,
    /// Malformed frame, unknown frame type, oversized frame, or sid collision
    #[strum(serialize = "stream_protocol")]
    Protocol = 3,
    /// Payload encode/decode failure reported by the external codec
    #[strum(serialize = "stream_codec")]
    Codec = 4,
    /// Method unknown, or the transport cannot host new streams
    #[strum(serialize = "stream_unavailable")]
    Unavailable = 5,
    /// The per-connection stream id counter overflowed
    #[strum(serialize = "stream_id_exhausted")]
    Exhausted = 6,
    /// Underlying connection read/write failure
    #[strum(serialize = "stream_io_err")]
    IO = 7,
}

// The default Debug derive would ignore the strum strings, and strum only has
// a Display derive
impl fmt::Debug for StreamErr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl StreamErr {
    #[inline]
    pub fn as_bytes<'a>(&'a self) -> &'a [u8] {
        self.as_ref().as_bytes()
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        *self == Self::Eof
    }
}

impl From<std::io::Error> for StreamErr {
    #[inline(always)]
    fn from(_e: std::io::Error) -> Self {
        Self::IO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_wire_strings() {
        println!("{}", StreamErr::Protocol);
        println!("{:?}", StreamErr::Protocol);
        let s = StreamErr::Cancelled.as_ref();
        assert!(s.starts_with(STREAM_ERR_PREFIX));
        let e = StreamErr::from_str(s).expect("parse");
        assert_eq!(e, StreamErr::Cancelled);
        assert!(StreamErr::from_str("cancelledss").is_err());
        assert!(StreamErr::Eof.is_eof());
        assert!(!StreamErr::Cancelled.is_eof());
    }

    #[test]
    fn test_from_io() {
        let e: StreamErr = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(e, StreamErr::IO);
    }
}
