// stream2parquet-storage - Store abstraction and write-ahead log
//
// The `Store` wraps an OpenDAL operator and adds the two-phase
// commit(temp, final) primitive the sink's exactly-once protocol is
// built on. The per-shard WAL persists its log through the same store,
// so a fresh process can replay it after a crash.

mod store;
mod wal;

pub use store::{FileStatus, Store};
pub use wal::{Wal, WalEntry, WalOp};
