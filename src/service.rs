//! The method directory contract consumed by the transport.
//!
//! Generated service glue normally provides the directory; the transport
//! only asks it for the streaming shape of a method. A server whose
//! directory misses a method answers the Header frame with an
//! `stream_unavailable` trailer and never surfaces the stream.

use crate::stream::StreamingMode;
use rustc_hash::FxHashMap;

/// Per-method description handed back by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDesc {
    pub mode: StreamingMode,
    /// The caller does not expect any response frames.
    pub oneway: bool,
}

impl MethodDesc {
    pub fn new(mode: StreamingMode) -> Self {
        Self { mode, oneway: false }
    }
}

pub trait MethodDirectory: Send + Sync + 'static {
    fn lookup(&self, method: &str) -> Option<MethodDesc>;
}

/// Directory backed by a static table, for hand-written services and tests.
#[derive(Default)]
pub struct StaticDirectory {
    methods: FxHashMap<String, MethodDesc>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: &str, desc: MethodDesc) -> Self {
        self.methods.insert(method.to_string(), desc);
        self
    }
}

impl MethodDirectory for StaticDirectory {
    #[inline]
    fn lookup(&self, method: &str) -> Option<MethodDesc> {
        self.methods.get(method).copied()
    }
}
