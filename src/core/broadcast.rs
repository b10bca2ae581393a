// Visible-subset computation and full-replace snapshot fan-out. The
// producer blocks only to encode; delivery is fire-and-forget and a lost
// frame is superseded by the next cycle.
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};

use crate::core::codec::encode_snapshot;
use crate::core::config::SharedConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::store::Snapshot;

const ACCEPT_IDLE: Duration = Duration::from_millis(50);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(200);
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Delivery target for encoded snapshot frames. Implementations must not
/// block the publisher; the wire server hands frames to its own threads.
pub trait SnapshotSink: Send + Sync {
    fn deliver(&self, frame: &[u8]);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishOutcome {
    Sent { entities: usize, bytes: usize },
    SkippedEmpty,
}

pub struct Broadcaster {
    config: SharedConfig,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    last_frame: Mutex<Option<Vec<u8>>>,
}

impl Broadcaster {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
            last_frame: Mutex::new(None),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn SnapshotSink>) {
        self.sinks.push(sink);
    }

    /// Encode the currently-visible subset once and hand it to every
    /// sink. The show-offline policy is read here, at publish time, so a
    /// runtime flip applies to the very next call. An empty visible
    /// subset publishes nothing and leaves the previous frame standing.
    pub fn publish(&self, snapshot: &Snapshot) -> PublishOutcome {
        let show_offline = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .show_offline;

        let visible: BTreeMap<_, _> = snapshot
            .entries()
            .iter()
            .filter(|(_, record)| record.online || show_offline)
            .map(|(id, record)| (*id, record.clone()))
            .collect();

        if visible.is_empty() {
            tracing::trace!("visible subset is empty; keeping last published view");
            return PublishOutcome::SkippedEmpty;
        }

        let entities = visible.len();
        let frame = encode_snapshot(&visible);
        let bytes = frame.len();
        *self.last_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
        for sink in &self.sinks {
            sink.deliver(&frame);
        }
        tracing::debug!(entities, bytes, "published snapshot");
        PublishOutcome::Sent { entities, bytes }
    }

    /// Most recent non-empty frame, if any cycle has published yet.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// TCP fan-out sink. An accept thread greets each observer with the
/// latest frame; published frames are queued and written to every
/// connected observer, dropping the ones whose writes fail.
pub struct WireServer {
    sender: Sender<Vec<u8>>,
    latest: Arc<Mutex<Option<Vec<u8>>>>,
    local_addr: SocketAddr,
}

impl WireServer {
    pub fn start(bind: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(bind).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message(format!("failed to bind observer listener at {bind}"))
                .with_source(err)
        })?;
        let local_addr = listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Transport).with_source(err)
        })?;
        listener.set_nonblocking(true).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("failed to set listener non-blocking")
                .with_source(err)
        })?;

        let (sender, receiver) = unbounded::<Vec<u8>>();
        let latest: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let accept_latest = Arc::clone(&latest);

        std::thread::spawn(move || {
            let mut observers: Vec<TcpStream> = Vec::new();
            loop {
                match listener.accept() {
                    Ok((mut stream, addr)) => {
                        tracing::info!(%addr, "observer connected");
                        if let Err(err) = stream.set_nodelay(true) {
                            tracing::warn!(%addr, error = %err, "failed to set TCP_NODELAY");
                        }
                        if let Err(err) = stream.set_nonblocking(false) {
                            tracing::warn!(%addr, error = %err, "failed to set blocking mode");
                            continue;
                        }
                        let greeting = accept_latest
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        if let Some(frame) = greeting {
                            if let Err(err) = write_frame(&mut stream, &frame) {
                                tracing::warn!(%addr, error = %err, "initial snapshot send failed");
                                continue;
                            }
                        }
                        observers.push(stream);
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_IDLE);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "error accepting observer");
                        std::thread::sleep(ACCEPT_ERROR_BACKOFF);
                    }
                }

                while let Ok(frame) = receiver.try_recv() {
                    fan_out(&mut observers, &frame);
                }
            }
        });

        Ok(Self {
            sender,
            latest,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl SnapshotSink for WireServer {
    fn deliver(&self, frame: &[u8]) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame.to_vec());
        if let Err(err) = self.sender.send(frame.to_vec()) {
            tracing::error!(error = %err, "failed to queue snapshot frame");
        }
    }
}

fn fan_out(observers: &mut Vec<TcpStream>, frame: &[u8]) {
    observers.retain_mut(|stream| match write_frame(stream, frame) {
        Ok(()) => true,
        Err(err) => {
            // Fire-and-forget: the observer is dropped, nothing retried.
            tracing::warn!(error = %err, "dropping observer");
            false
        }
    });
}

pub fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)
}

pub fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, Error> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("observer stream closed")
            .with_source(err)
    })?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("frame length {len} exceeds max")));
    }
    let mut frame = vec![0u8; len as usize];
    stream.read_exact(&mut frame).map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("truncated frame")
            .with_source(err)
    })?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::{Broadcaster, PublishOutcome, SnapshotSink, WireServer, read_frame};
    use crate::core::codec::decode_snapshot;
    use crate::core::config::{SyncConfig, shared};
    use crate::core::record::StatRecord;
    use crate::core::store::StatStore;
    use std::net::TcpStream;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct CollectSink {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl SnapshotSink for CollectSink {
        fn deliver(&self, frame: &[u8]) {
            self.frames.lock().expect("lock").push(frame.to_vec());
        }
    }

    fn store_with(online: Uuid, offline: Uuid) -> StatStore {
        let store = StatStore::new();
        store.replace(
            online,
            StatRecord::default().with_name("alice").with_online(true),
        );
        store.replace(offline, StatRecord::default().with_name("bob"));
        store
    }

    #[test]
    fn offline_entities_follow_the_policy_read_at_publish_time() {
        let config = shared(SyncConfig {
            show_offline: false,
            ..SyncConfig::default()
        });
        let sink = Arc::new(CollectSink::default());
        let mut broadcaster = Broadcaster::new(Arc::clone(&config));
        broadcaster.add_sink(sink.clone());

        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let store = store_with(online, offline);

        broadcaster.publish(&store.snapshot());
        {
            let frames = sink.frames.lock().expect("lock");
            let decoded = decode_snapshot(&frames[0]).expect("decode");
            assert!(decoded.contains_key(&online));
            assert!(!decoded.contains_key(&offline));
        }

        // Flip the policy at runtime; the next publish must include the
        // offline entity without any restart.
        config.write().expect("lock").show_offline = true;
        broadcaster.publish(&store.snapshot());
        let frames = sink.frames.lock().expect("lock");
        let decoded = decode_snapshot(&frames[1]).expect("decode");
        assert!(decoded.contains_key(&offline));
    }

    #[test]
    fn unchanged_snapshot_publishes_identical_bytes() {
        let sink = Arc::new(CollectSink::default());
        let mut broadcaster = Broadcaster::new(shared(SyncConfig::default()));
        broadcaster.add_sink(sink.clone());

        let store = store_with(Uuid::new_v4(), Uuid::new_v4());
        let snapshot = store.snapshot();
        broadcaster.publish(&snapshot);
        broadcaster.publish(&snapshot);

        let frames = sink.frames.lock().expect("lock");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
    }

    #[test]
    fn empty_visible_subset_is_a_noop() {
        let config = shared(SyncConfig {
            show_offline: false,
            ..SyncConfig::default()
        });
        let sink = Arc::new(CollectSink::default());
        let mut broadcaster = Broadcaster::new(config);
        broadcaster.add_sink(sink.clone());

        let online = Uuid::new_v4();
        let store = store_with(online, Uuid::new_v4());
        assert!(matches!(
            broadcaster.publish(&store.snapshot()),
            PublishOutcome::Sent { entities: 1, .. }
        ));
        let good_frame = broadcaster.last_frame().expect("frame");

        // Everyone goes offline: the visible subset is empty and the
        // previous good frame must survive untouched.
        store.update(&online, |record| record.online = false);
        assert_eq!(
            broadcaster.publish(&store.snapshot()),
            PublishOutcome::SkippedEmpty
        );
        assert_eq!(sink.frames.lock().expect("lock").len(), 1);
        assert_eq!(broadcaster.last_frame().expect("frame"), good_frame);
    }

    #[test]
    fn wire_server_greets_and_fans_out() {
        let server = WireServer::start("127.0.0.1:0".parse().expect("addr")).expect("start");

        let store = store_with(Uuid::new_v4(), Uuid::new_v4());
        let mut broadcaster = Broadcaster::new(shared(SyncConfig::default()));
        let server = Arc::new(server);
        broadcaster.add_sink(server.clone());
        broadcaster.publish(&store.snapshot());
        let expected = broadcaster.last_frame().expect("frame");

        let mut observer = TcpStream::connect(server.local_addr()).expect("connect");
        observer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");

        // Newcomers are greeted with the latest published frame.
        let greeted = read_frame(&mut observer).expect("greeting");
        assert_eq!(greeted, expected);

        // Subsequent publishes fan out to connected observers.
        broadcaster.publish(&store.snapshot());
        let frame = read_frame(&mut observer).expect("frame");
        assert_eq!(frame, expected);
    }
}
