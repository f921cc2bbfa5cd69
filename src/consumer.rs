//! Consumer replica handle.

use std::io;

/// One replica endpoint of the downstream consumer service.
///
/// Implementations wrap a set of buffered connections to the replica;
/// `conn_index` selects the sub-channel. A shard is always pinned to the
/// same index (`shard % num_connections`), which preserves per-shard
/// ordering on the wire.
pub trait ConsumerWriter: Send + Sync {
    /// Writes an encoded frame on the given connection. May block while
    /// the connection's buffered writer drains.
    fn write(&self, conn_index: usize, buf: &[u8]) -> io::Result<()>;

    /// Free space in the connection's write buffer, in bytes.
    fn available_buffer(&self, conn_index: usize) -> usize;

    /// Drains the connection's buffered writer now instead of waiting
    /// for its flush interval.
    fn forced_flush(&self, conn_index: usize) -> io::Result<()>;

    /// Remote address, used to identify the replica on removal.
    fn address(&self) -> &str;
}
