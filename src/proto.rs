//! Frame protocol: the atomic wire unit and its codec.
//!
//! On-wire layout, all integers big-endian:
//!
//! ```text
//! | 2B    | 4B     | 1B   | 4B  | 1B    | 2B         | method_len |
//! | magic | length | type | sid | flags | method_len | method     |
//!
//! | 4B      | ext_len | 4B          | payload_len |
//! | ext_len | ext     | payload_len | payload     |
//! ```
//!
//! `length` excludes magic and itself. The ext block is a sequence of
//! `(klen:u16)(k)(vlen:u16)(v)` pairs carrying the header, trailer or meta
//! map of the frame, order preserved. Per stream the wire sequence is one
//! Header, zero or more Data, an optional Trailer; Meta may appear between
//! Header and the first Data.

use crate::error::StreamErr;
use io_buffer::Buffer;
use std::fmt;
use std::str::FromStr;
use weft_rpc_core::io::{AsyncRead, AsyncWrite};

pub const FRAME_MAGIC: [u8; 2] = [b'%', b'W'];

/// type(1) + sid(4) + flags(1) + method_len(2)
const FIXED_LEN: usize = 8;
/// FIXED_LEN + ext_len(4) + payload_len(4) with everything variable empty
const MIN_FRAME_LEN: usize = FIXED_LEN + 8;

/// The ext keys the transport itself understands. `biz-status` carries the
/// wire string of a [StreamErr] kind; absence means OK.
pub const META_STATUS: &'static str = "biz-status";
pub const META_MESSAGE: &'static str = "biz-message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Meta = 0,
    Header = 1,
    Data = 2,
    Trailer = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = StreamErr;

    #[inline]
    fn try_from(v: u8) -> Result<Self, StreamErr> {
        match v {
            0 => Ok(Self::Meta),
            1 => Ok(Self::Header),
            2 => Ok(Self::Data),
            3 => Ok(Self::Trailer),
            _ => Err(StreamErr::Protocol),
        }
    }
}

/// Insertion-ordered string map carried in the ext block of a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set semantics with first-insert ordering: a duplicate key replaces
    /// the value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the transport status entry, if any.
    pub fn status(&self) -> Option<StreamErr> {
        self.get(META_STATUS).and_then(|s| StreamErr::from_str(s).ok())
    }

    fn encoded_len(&self) -> usize {
        self.0.iter().map(|(k, v)| 4 + k.len() + v.len()).sum()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}

/// The atomic wire unit.
///
/// `ext` is the header, trailer or meta map depending on `typ`; `payload` is
/// only meaningful on Data frames.
pub struct Frame {
    pub typ: FrameType,
    pub sid: i32,
    pub flags: u8,
    pub method: String,
    pub ext: Metadata,
    pub payload: Buffer,
}

impl Frame {
    #[inline]
    fn new(typ: FrameType, sid: i32, method: &str, ext: Metadata, payload: Buffer) -> Self {
        Self { typ, sid, flags: 0, method: method.to_string(), ext, payload }
    }

    pub fn header(sid: i32, method: &str, header: Metadata) -> Self {
        Self::new(FrameType::Header, sid, method, header, empty_payload())
    }

    pub fn data(sid: i32, method: &str, payload: Buffer) -> Self {
        Self::new(FrameType::Data, sid, method, Metadata::new(), payload)
    }

    pub fn trailer(sid: i32, method: &str, trailer: Metadata) -> Self {
        Self::new(FrameType::Trailer, sid, method, trailer, empty_payload())
    }

    pub fn meta(sid: i32, method: &str, meta: Metadata) -> Self {
        Self::new(FrameType::Meta, sid, method, meta, empty_payload())
    }
}

#[inline]
fn empty_payload() -> Buffer {
    Buffer::from(Vec::new())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[sid:{}, type:{:?}, method:{:?}, ext:{}, payload:{}B]",
            self.sid,
            self.typ,
            self.method,
            self.ext.len(),
            self.payload.len(),
        )
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Write one frame. Returns an error only on writer failure, or Protocol
/// when the frame breaks a size limit of the layout.
pub async fn encode_frame<W: AsyncWrite>(
    w: &mut W, fr: &Frame, max_frame_bytes: usize,
) -> Result<(), StreamErr> {
    if fr.method.len() > u16::MAX as usize {
        return Err(StreamErr::Protocol);
    }
    let ext_len = fr.ext.encoded_len();
    let total = FIXED_LEN + fr.method.len() + 4 + ext_len + 4 + fr.payload.len();
    if total + 6 > max_frame_bytes {
        return Err(StreamErr::Protocol);
    }

    let mut head = [0u8; 14];
    head[0..2].copy_from_slice(&FRAME_MAGIC);
    head[2..6].copy_from_slice(&(total as u32).to_be_bytes());
    head[6] = fr.typ as u8;
    head[7..11].copy_from_slice(&fr.sid.to_be_bytes());
    head[11] = fr.flags;
    head[12..14].copy_from_slice(&(fr.method.len() as u16).to_be_bytes());
    w.write_all(&head).await?;
    w.write_all(fr.method.as_bytes()).await?;

    w.write_all(&(ext_len as u32).to_be_bytes()).await?;
    for (k, v) in fr.ext.iter() {
        if k.len() > u16::MAX as usize || v.len() > u16::MAX as usize {
            return Err(StreamErr::Protocol);
        }
        w.write_all(&(k.len() as u16).to_be_bytes()).await?;
        w.write_all(k.as_bytes()).await?;
        w.write_all(&(v.len() as u16).to_be_bytes()).await?;
        w.write_all(v.as_bytes()).await?;
    }

    w.write_all(&(fr.payload.len() as u32).to_be_bytes()).await?;
    w.write_all(fr.payload.as_ref()).await?;
    Ok(())
}

/// Read one frame, blocking until it is complete.
///
/// Returns Eof only on a clean close at a frame boundary; a close in the
/// middle of a frame, a bad magic, an unknown type, a length that does not
/// add up, or a frame above `max_frame_bytes` is Protocol and the caller
/// MUST tear down the connection.
pub async fn decode_frame<R: AsyncRead>(
    r: &mut R, max_frame_bytes: usize,
) -> Result<Frame, StreamErr> {
    let mut head = [0u8; 6];
    let mut got = 0usize;
    while got < head.len() {
        let n = r.read(&mut head[got..]).await?;
        if n == 0 {
            if got == 0 {
                return Err(StreamErr::Eof);
            }
            return Err(StreamErr::Protocol);
        }
        got += n;
    }
    if head[0..2] != FRAME_MAGIC {
        warn!("frame decode: wrong magic received {:?}", &head[0..2]);
        return Err(StreamErr::Protocol);
    }
    let total = u32::from_be_bytes([head[2], head[3], head[4], head[5]]) as usize;
    if total < MIN_FRAME_LEN || total + 6 > max_frame_bytes {
        warn!("frame decode: invalid frame length {}", total);
        return Err(StreamErr::Protocol);
    }

    let mut fixed = [0u8; FIXED_LEN];
    read_body(r, &mut fixed).await?;
    let typ = FrameType::try_from(fixed[0])?;
    let sid = i32::from_be_bytes([fixed[1], fixed[2], fixed[3], fixed[4]]);
    let flags = fixed[5];
    let method_len = u16::from_be_bytes([fixed[6], fixed[7]]) as usize;

    let mut left = total - FIXED_LEN;
    if method_len + 4 > left {
        return Err(StreamErr::Protocol);
    }
    let mut method_buf = vec![0u8; method_len];
    read_body(r, &mut method_buf).await?;
    let method = String::from_utf8(method_buf).map_err(|_| StreamErr::Protocol)?;
    left -= method_len;

    let mut len_buf = [0u8; 4];
    read_body(r, &mut len_buf).await?;
    let ext_len = u32::from_be_bytes(len_buf) as usize;
    left -= 4;
    if ext_len + 4 > left {
        return Err(StreamErr::Protocol);
    }
    let mut ext_buf = vec![0u8; ext_len];
    read_body(r, &mut ext_buf).await?;
    let ext = parse_ext(&ext_buf)?;
    left -= ext_len;

    read_body(r, &mut len_buf).await?;
    let payload_len = u32::from_be_bytes(len_buf) as usize;
    left -= 4;
    if payload_len != left {
        warn!("frame decode: length mismatch, {} left for {} payload", left, payload_len);
        return Err(StreamErr::Protocol);
    }
    let payload = if payload_len == 0 {
        empty_payload()
    } else {
        // owned storage, freed when the consumer drops it after decode
        let mut payload = Buffer::alloc(payload_len as i32).map_err(|_| StreamErr::IO)?;
        read_body(r, &mut payload).await?;
        payload
    };

    Ok(Frame { typ, sid, flags, method, ext, payload })
}

#[inline(always)]
async fn read_body<R: AsyncRead>(r: &mut R, buf: &mut [u8]) -> Result<(), StreamErr> {
    r.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StreamErr::Protocol
        } else {
            StreamErr::IO
        }
    })
}

fn parse_ext(buf: &[u8]) -> Result<Metadata, StreamErr> {
    let mut md = Metadata::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let (key, next) = parse_ext_str(buf, pos)?;
        let (value, next) = parse_ext_str(buf, next)?;
        md.insert(key, value);
        pos = next;
    }
    Ok(md)
}

#[inline]
fn parse_ext_str(buf: &[u8], pos: usize) -> Result<(&str, usize), StreamErr> {
    if pos + 2 > buf.len() {
        return Err(StreamErr::Protocol);
    }
    let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
    let start = pos + 2;
    if start + len > buf.len() {
        return Err(StreamErr::Protocol);
    }
    let s = str::from_utf8(&buf[start..start + len]).map_err(|_| StreamErr::Protocol)?;
    Ok((s, start + len))
}
