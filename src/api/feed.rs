//! Purpose: Observer-side transport loop: read snapshot frames, decode,
//! apply to the client cache.
//! Exports: `SnapshotFeed`.
//! Role: Thin client over the wire server's length-prefixed stream.
//! Invariants: A frame that fails to decode is dropped with a warning and
//! the previous view stays intact; only transport failures surface.
use std::net::{TcpStream, ToSocketAddrs};

use crate::api::cache::ClientCache;
use crate::core::broadcast::read_frame;
use crate::core::codec::decode_snapshot;
use crate::core::error::{Error, ErrorKind};

pub struct SnapshotFeed {
    stream: TcpStream,
}

impl SnapshotFeed {
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self, Error> {
        let stream = TcpStream::connect(&addr).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message(format!("failed to connect to {addr:?}"))
                .with_source(err)
        })?;
        Ok(Self { stream })
    }

    /// Block for the next frame and replace the cache contents with it.
    /// Returns the entity count of the applied snapshot, or zero when a
    /// corrupt frame was dropped. Errors only on transport failure.
    pub fn next_into(&mut self, cache: &ClientCache) -> Result<usize, Error> {
        let frame = read_frame(&mut self.stream)?;
        match decode_snapshot(&frame) {
            Ok(entries) => {
                let count = entries.len();
                cache.apply(entries);
                Ok(count)
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable snapshot frame");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SnapshotFeed;
    use crate::api::cache::ClientCache;
    use crate::core::broadcast::{Broadcaster, WireServer};
    use crate::core::config::{SyncConfig, shared};
    use crate::core::record::StatRecord;
    use crate::core::store::StatStore;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn feed_applies_published_snapshots() {
        let server = Arc::new(WireServer::start("127.0.0.1:0".parse().expect("addr")).expect("start"));
        let mut broadcaster = Broadcaster::new(shared(SyncConfig::default()));
        broadcaster.add_sink(server.clone());

        let store = StatStore::new();
        let id = Uuid::new_v4();
        store.replace(
            id,
            StatRecord::default().with_name("alice").with_online(true),
        );
        broadcaster.publish(&store.snapshot());

        let mut feed = SnapshotFeed::connect(server.local_addr()).expect("connect");
        let cache = ClientCache::new();
        let count = feed.next_into(&cache).expect("frame");
        assert_eq!(count, 1);
        assert_eq!(cache.get(&id).expect("record").name, "alice");
    }

    #[test]
    fn corrupt_frame_keeps_the_previous_view() {
        use crate::core::broadcast::write_frame;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let producer = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            write_frame(&mut stream, b"garbage").expect("write");
        });

        let mut feed = SnapshotFeed::connect(addr).expect("connect");
        let cache = ClientCache::new();
        let id = Uuid::new_v4();
        cache.apply(std::collections::BTreeMap::from([(
            id,
            StatRecord::default().with_name("kept"),
        )]));

        let count = feed.next_into(&cache).expect("dropped frame");
        assert_eq!(count, 0);
        assert_eq!(cache.get(&id).expect("record").name, "kept");
        producer.join().expect("join");
    }
}
