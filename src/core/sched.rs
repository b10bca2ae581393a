// Scan-and-publish cadence. One worker thread owns the cycle; ticks that
// elapse while a cycle is still running are dropped, never queued, and
// forced resyncs coalesce behind a short cooldown.
use std::sync::PoisonError;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};

use crate::core::config::SharedConfig;

enum Control {
    Resync,
    Stop,
}

/// Drives the authoritative scan-and-publish cycle. Pure-observer
/// deployments never construct one.
pub struct Scheduler {
    control: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the cadence thread. `cycle` is the whole scan-and-publish
    /// step; it always runs on the spawned thread, so cycles can never
    /// overlap. The interval and cooldown are re-read from `config`
    /// every lap, so runtime changes apply from the next tick.
    pub fn spawn(config: SharedConfig, mut cycle: impl FnMut() + Send + 'static) -> Self {
        let (control, inbox) = unbounded::<Control>();

        let handle = std::thread::spawn(move || {
            let mut last_cycle_end = Instant::now();
            loop {
                let (interval, cooldown) = {
                    let config = config.read().unwrap_or_else(PoisonError::into_inner);
                    (config.scan_interval, config.resync_cooldown)
                };
                let deadline = last_cycle_end + interval;
                let wait = deadline.saturating_duration_since(Instant::now());

                match inbox.recv_timeout(wait) {
                    Ok(Control::Stop) => break,
                    Ok(Control::Resync) => {
                        // Coalesce bursts (a wave of joins) into one cycle.
                        while let Ok(Control::Resync) = inbox.try_recv() {}
                        if last_cycle_end.elapsed() < cooldown {
                            tracing::trace!("resync requested within cooldown; skipped");
                            continue;
                        }
                        run_cycle(&mut cycle, interval, &mut last_cycle_end);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        run_cycle(&mut cycle, interval, &mut last_cycle_end);
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self {
            control,
            handle: Some(handle),
        }
    }

    /// Ask for an immediate cycle (e.g. right after a join). Safe from
    /// any thread; ignored when inside the cooldown window.
    pub fn request_resync(&self) {
        let _ = self.control.send(Control::Resync);
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.send(Control::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_cycle(cycle: &mut impl FnMut(), interval: Duration, last_cycle_end: &mut Instant) {
    let started = Instant::now();
    cycle();
    *last_cycle_end = Instant::now();
    let took = started.elapsed();
    if took > interval {
        // The next deadline restarts from the cycle end, so the ticks
        // that elapsed during the overrun are gone, not backlogged.
        tracing::warn!(
            took_ms = took.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "scan cycle overran its interval; dropped ticks"
        );
    }
}
