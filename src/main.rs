//! Purpose: `tabstat` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits tables or
//! JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

mod serve;
mod watch;

use tabstat::api::{
    ClientCache, EmptyRoster, Error, RenderCache, StatStore, SyncConfig, SyncEngine,
    clamp_scan_interval, parse_stat_keys, shared, to_exit_code,
};

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve::run(args),
        Command::Watch(args) => watch::run(args),
        Command::Dump(args) => dump(args),
    }
}

fn emit_error(err: &Error) {
    let payload = json!({
        "error": {
            "kind": format!("{:?}", err.kind()),
            "detail": err.to_string(),
        }
    });
    eprintln!("{payload}");
}

#[derive(Parser)]
#[command(
    name = "tabstat",
    version,
    about = "Live player-stat sync for tab-list observers",
    long_about = None,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the authoritative side: scan stat files, broadcast snapshots")]
    Serve(serve::ServeArgs),
    #[command(about = "Run an observer: follow a serve endpoint, render the stat table")]
    Watch(watch::WatchArgs),
    #[command(about = "One-shot scan of a stats directory, printed as table or JSON")]
    Dump(DumpArgs),
}

#[derive(clap::Args)]
pub struct DumpArgs {
    #[arg(long, help = "Directory of per-entity stat JSON files")]
    stats_dir: PathBuf,
    #[arg(long, help = "Emit records as JSON instead of a table")]
    json: bool,
    #[arg(long, help = "Abbreviated stat labels and values")]
    compact: bool,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Comma-separated stat keys to show (unknown keys are ignored)"
    )]
    stats: Vec<String>,
}

fn dump(args: DumpArgs) -> Result<(), Error> {
    let mut config = SyncConfig::default();
    config.compact = args.compact;
    if !args.stats.is_empty() {
        config.visible_stats = parse_stat_keys(&args.stats);
    }
    let visible = config.visible_stats.clone();
    let compact = config.compact;

    let engine = SyncEngine::new(StatStore::new(), &args.stats_dir, shared(config));
    let summary = engine.load_all(&EmptyRoster);
    tracing::debug!(parsed = summary.parsed, failed = summary.failed, "dump scan done");

    let snapshot = engine.store().snapshot();
    if args.json {
        let entries: serde_json::Map<String, serde_json::Value> = snapshot
            .entries()
            .iter()
            .map(|(id, record)| {
                (
                    id.to_string(),
                    serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        println!("{}", serde_json::Value::Object(entries));
        return Ok(());
    }

    // Render through the same cache path observers use; dump output and
    // watch output stay in the same shape.
    let cache = ClientCache::new();
    cache.apply(snapshot.entries().clone());
    let render = RenderCache::new();

    let mut header = format!("{:<36}  {:<16}", "entity", "name");
    for key in &visible {
        header.push_str(&format!("  {:<12}", key.label(compact)));
    }
    println!("{header}");
    for (id, record) in snapshot.entries() {
        let mut row = format!("{:<36}  {:<16}", id, record.name);
        if let Some(line) = render.stat_line(&cache, id, &visible, compact, false) {
            for (_, text) in line {
                row.push_str(&format!("  {text:<12}"));
            }
        }
        println!("{row}");
    }
    Ok(())
}

pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

pub(crate) fn seconds(value: u64) -> Duration {
    clamp_scan_interval(Duration::from_secs(value))
}
