//! Purpose: Observer loop: follow a serve endpoint, keep the client
//! cache current, render the stat table on every received snapshot.
//! Role: `tabstat watch` implementation.
//! Invariants: The rendered view always comes from exactly one snapshot
//! generation; lost connections reconnect and the last view stands.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tabstat::api::{
    ClientCache, Error, ErrorKind, RenderCache, SnapshotFeed, StatKey, SyncConfig,
    parse_stat_keys,
};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(clap::Args)]
pub struct WatchArgs {
    #[arg(long, default_value = "127.0.0.1:7177", help = "Serve endpoint to follow")]
    connect: String,
    #[arg(long, help = "Abbreviated stat labels and values")]
    compact: bool,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Comma-separated stat keys to show (unknown keys are ignored)"
    )]
    stats: Vec<String>,
    #[arg(long, help = "Do not gray out offline entities")]
    no_dim_offline: bool,
}

pub fn run(args: WatchArgs) -> Result<(), Error> {
    crate::init_tracing();

    let defaults = SyncConfig::default();
    let visible = if args.stats.is_empty() {
        defaults.visible_stats.clone()
    } else {
        parse_stat_keys(&args.stats)
    };
    if visible.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("no valid stat keys to display"));
    }
    let dim_offline = !args.no_dim_offline;

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to register shutdown signal")
                .with_source(err)
        })?;
    }

    let cache = ClientCache::new();
    let render = RenderCache::new();

    while !stop.load(Ordering::Relaxed) {
        let mut feed = match SnapshotFeed::connect(args.connect.as_str()) {
            Ok(feed) => feed,
            Err(err) => {
                tracing::warn!(error = %err, "connect failed; retrying");
                std::thread::sleep(RECONNECT_BACKOFF);
                continue;
            }
        };
        tracing::info!(endpoint = %args.connect, "following");

        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match feed.next_into(&cache) {
                Ok(0) => continue,
                Ok(_) => print_table(&cache, &render, &visible, args.compact, dim_offline),
                Err(err) => {
                    // The cached view stays as-is until the next snapshot
                    // after reconnect supersedes it.
                    tracing::warn!(error = %err, "feed interrupted; reconnecting");
                    std::thread::sleep(RECONNECT_BACKOFF);
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_table(
    cache: &ClientCache,
    render: &RenderCache,
    visible: &[StatKey],
    compact: bool,
    dim_offline: bool,
) {
    let mut ids: Vec<_> = cache
        .ids()
        .into_iter()
        .filter_map(|id| cache.get(&id).map(|record| (id, record)))
        .collect();
    // Online first, then by display name.
    ids.sort_by(|(_, a), (_, b)| b.online.cmp(&a.online).then_with(|| a.name.cmp(&b.name)));

    let mut header = format!("{:<16}", "name");
    for key in visible {
        header.push_str(&format!("  {:<12}", key.label(compact)));
    }
    println!("{header}");
    for (id, record) in &ids {
        let mut row = format!("{:<16}", display_name(record.name.as_str(), id));
        if let Some(line) = render.stat_line(cache, id, visible, compact, dim_offline) {
            for (_, text) in line {
                row.push_str(&format!("  {text:<12}"));
            }
        }
        println!("{row}");
    }
    println!("  -- {} entities, {} --", ids.len(), rfc3339_now());
}

fn rfc3339_now() -> String {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string())
}

fn display_name(name: &str, id: &uuid::Uuid) -> String {
    if name.is_empty() {
        let mut short = id.to_string();
        short.truncate(8);
        short
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::display_name;
    use uuid::Uuid;

    #[test]
    fn empty_names_fall_back_to_short_id() {
        let id = Uuid::new_v4();
        let shown = display_name("", &id);
        assert_eq!(shown.len(), 8);
        assert!(id.to_string().starts_with(&shown));
        assert_eq!(display_name("alice", &id), "alice");
    }
}
