//! Purpose: Define the stable public Rust API boundary for tabstat.
//! Exports: Core types and operations needed by host embedders and the CLI.
//! Role: Public, additive-only surface; the host drives the engine and
//! scheduler, observers drive the feed and caches.
//! Invariants: Connectivity enters through `SyncEngine` method calls, not
//! a subscription mechanism.

mod cache;
mod feed;
mod render;

pub use crate::core::broadcast::{
    Broadcaster, PublishOutcome, SnapshotSink, WireServer, read_frame, write_frame,
};
pub use crate::core::codec::{decode_snapshot, encode_snapshot};
pub use crate::core::config::{
    DEFAULT_RETENTION, DEFAULT_SCAN_INTERVAL, SharedConfig, SyncConfig, clamp_scan_interval,
    parse_stat_keys, shared,
};
pub use crate::core::engine::{EmptyRoster, LoadSummary, Roster, SyncEngine, now_ms};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::record::{ALL_STAT_KEYS, EntityId, StatKey, StatRecord};
pub use crate::core::sched::Scheduler;
pub use crate::core::store::{Snapshot, StatStore};
pub use cache::ClientCache;
pub use feed::SnapshotFeed;
pub use render::{Formatter, RenderCache, formatter, formatter_for};
