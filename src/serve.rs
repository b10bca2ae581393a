//! Purpose: Wire up the authoritative role: engine + scheduler + wire
//! fan-out, with a roster file standing in for the host's session layer.
//! Role: `tabstat serve` implementation.
//! Invariants: Join/leave reach the engine as plain method calls derived
//! from roster diffs; the scan cycle owns all store mutation otherwise.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use tabstat::api::{
    Broadcaster, Error, ErrorKind, Roster, Scheduler, StatStore, SyncConfig, SyncEngine,
    WireServer, shared,
};

#[derive(clap::Args)]
pub struct ServeArgs {
    #[arg(long, help = "Directory of per-entity stat JSON files")]
    stats_dir: PathBuf,
    #[arg(long, default_value = "127.0.0.1:7177", help = "Observer listen address")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 5, help = "Scan interval in seconds (1-300)")]
    interval: u64,
    #[arg(
        long,
        help = "Connected-entity roster file: one '<uuid> <name>' per line, reread each cycle"
    )]
    roster_file: Option<PathBuf>,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set,
          help = "Include offline entities in published snapshots")]
    show_offline: bool,
    #[arg(long, help = "Drop offline records past the retention threshold")]
    no_retain_offline: bool,
    #[arg(long, default_value_t = 30, help = "Offline retention threshold in days")]
    retention_days: u64,
}

pub fn run(args: ServeArgs) -> Result<(), Error> {
    crate::init_tracing();

    let mut config = SyncConfig::default();
    config.show_offline = args.show_offline;
    config.retain_offline = !args.no_retain_offline;
    config.retention = Duration::from_secs(args.retention_days * 24 * 60 * 60);
    config.scan_interval = crate::seconds(args.interval);
    let config = shared(config);

    let engine = Arc::new(SyncEngine::new(
        StatStore::new(),
        &args.stats_dir,
        Arc::clone(&config),
    ));
    let roster = Arc::new(FileRoster::new(args.roster_file));

    let wire = Arc::new(WireServer::start(args.bind)?);
    tracing::info!(addr = %wire.local_addr(), "observer listener up");
    let mut broadcaster = Broadcaster::new(Arc::clone(&config));
    broadcaster.add_sink(wire);
    let broadcaster = Arc::new(broadcaster);

    let cycle = {
        let engine = Arc::clone(&engine);
        let roster = Arc::clone(&roster);
        let broadcaster = Arc::clone(&broadcaster);
        move || {
            roster.refresh(engine.as_ref());
            engine.load_all(roster.as_ref());
            engine.cleanup();
            broadcaster.publish(&engine.store().snapshot());
        }
    };

    // Initial rebuild before the cadence starts, as on host startup.
    let mut warm_up = cycle.clone();
    warm_up();

    let scheduler = Scheduler::spawn(config, cycle);

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to register shutdown signal")
                .with_source(err)
        })?;
    }

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
    tracing::info!("shutting down");
    scheduler.shutdown();
    engine.reset();
    Ok(())
}

/// Stand-in for the host's connection lifecycle: the roster file lists
/// currently connected entities; diffs against the previous read are
/// delivered to the engine as join/leave calls.
struct FileRoster {
    path: Option<PathBuf>,
    connected: Mutex<HashMap<Uuid, String>>,
}

impl FileRoster {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            connected: Mutex::new(HashMap::new()),
        }
    }

    fn refresh(&self, engine: &SyncEngine) {
        let Some(path) = &self.path else { return };
        let next = read_roster_file(path);
        let mut connected = self.connected.lock().unwrap_or_else(PoisonError::into_inner);

        for (id, name) in &next {
            if connected.get(id) != Some(name) {
                engine.on_entity_join(*id, name);
            }
        }
        for id in connected.keys() {
            if !next.contains_key(id) {
                engine.on_entity_leave(id);
            }
        }
        *connected = next;
    }
}

impl Roster for FileRoster {
    fn display_name(&self, id: &Uuid) -> Option<String> {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

fn read_roster_file(path: &Path) -> HashMap<Uuid, String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        tracing::warn!(path = %path.display(), "roster file unreadable; treating as empty");
        return HashMap::new();
    };
    let mut connected = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let Some(id) = parts.next().and_then(|part| Uuid::parse_str(part).ok()) else {
            tracing::debug!(line, "skipping malformed roster line");
            continue;
        };
        let name = parts.next().unwrap_or("").trim().to_string();
        connected.insert(id, name);
    }
    connected
}

#[cfg(test)]
mod tests {
    use super::{FileRoster, read_roster_file};
    use tabstat::api::{Roster, StatStore, SyncConfig, SyncEngine, shared};
    use uuid::Uuid;

    #[test]
    fn roster_file_parses_uuid_name_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("roster");
        let id = Uuid::new_v4();
        std::fs::write(
            &path,
            format!("# connected\n{id} alice\nnot-a-uuid bob\n\n"),
        )
        .expect("write");

        let connected = read_roster_file(&path);
        assert_eq!(connected.len(), 1);
        assert_eq!(connected.get(&id).map(String::as_str), Some("alice"));
    }

    #[test]
    fn roster_diffs_drive_join_and_leave() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("roster");
        let id = Uuid::new_v4();
        std::fs::write(&path, format!("{id} alice\n")).expect("write");

        let engine = SyncEngine::new(StatStore::new(), dir.path(), shared(SyncConfig::default()));
        let roster = FileRoster::new(Some(path.clone()));

        roster.refresh(&engine);
        assert!(engine.store().get(&id).expect("record").online);
        assert_eq!(roster.display_name(&id).as_deref(), Some("alice"));

        std::fs::write(&path, "").expect("truncate");
        roster.refresh(&engine);
        assert!(!engine.store().get(&id).expect("record").online);
        assert_eq!(roster.display_name(&id), None);
    }
}
