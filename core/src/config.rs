use std::time::Duration;

/// Tunables of one streaming connection.
#[derive(Clone)]
pub struct TransportConfig {
    /// A connection without frame activity for longer than this is reported
    /// unavailable to pool scavengers.
    pub idle_timeout: Duration,
    /// Hard inactivity deadline on the read side, the connection is torn
    /// down when no frame arrives within it.
    pub conn_deadline: Duration,
    /// Capacity of the outgoing frame channel; senders block when it is
    /// full, which bounds how far producers can run ahead of the writer.
    pub write_chan_capacity: usize,
    /// How many inbound streams the server accept path drains per batch.
    pub accept_batch_size: usize,
    /// Frames larger than this are rejected as a protocol error.
    pub max_frame_bytes: usize,
    /// Size of the buffered reader and writer wrapped around the connection.
    pub io_buf_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            conn_deadline: Duration::from_secs(3600),
            write_chan_capacity: 32,
            accept_batch_size: 32,
            max_frame_bytes: 16 << 20,
            io_buf_size: 64 << 10,
        }
    }
}
