use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::random::{self, RandomSource};
use crate::ticker::Ticker;
use crate::types::{AppStatus, AppTrafficEntry, TrafficState};

/// Tracked applications in display order, with their glyphs.
pub const APP_CATALOG: [(&str, &str); 8] = [
    ("WhatsApp", "📱"),
    ("Chrome", "🌐"),
    ("Instagram", "📸"),
    ("YouTube", "📺"),
    ("Telegram", "💬"),
    ("TikTok", "🎵"),
    ("Gmail", "📧"),
    ("Spotify", "🎶"),
];

const MAX_APP_UPLOAD_STEP: f64 = 10.0;
const MAX_APP_DOWNLOAD_STEP: f64 = 50.0;
const MAX_TOTAL_UPLOAD_STEP: f64 = 50.0;
const MAX_TOTAL_DOWNLOAD_STEP: f64 = 200.0;
/// An app is marked active when its status draw exceeds this.
const ACTIVE_GATE: f64 = 0.8;

/// Zeroed state for the fixed catalog, every app routed.
pub fn initial_state() -> TrafficState {
    TrafficState {
        total_upload_bytes: 0.0,
        total_download_bytes: 0.0,
        entries: APP_CATALOG
            .iter()
            .map(|(name, icon)| AppTrafficEntry {
                name: (*name).to_string(),
                icon: (*icon).to_string(),
                upload_bytes: 0.0,
                download_bytes: 0.0,
                status: AppStatus::Routed,
            })
            .collect(),
    }
}

/// Apply one traffic tick to `state`.
///
/// Per app, in catalog order: upload, download, status. Then the two
/// totals, which are drawn on their own and are not the sum of the
/// per-app increments. `Blocked` is never produced.
pub fn apply_tick(state: &mut TrafficState, rng: &mut dyn RandomSource) {
    for entry in &mut state.entries {
        entry.upload_bytes += rng.next_unit() * MAX_APP_UPLOAD_STEP;
        entry.download_bytes += rng.next_unit() * MAX_APP_DOWNLOAD_STEP;
        entry.status = if rng.next_unit() > ACTIVE_GATE {
            AppStatus::Active
        } else {
            AppStatus::Routed
        };
    }
    state.total_upload_bytes += rng.next_unit() * MAX_TOTAL_UPLOAD_STEP;
    state.total_download_bytes += rng.next_unit() * MAX_TOTAL_DOWNLOAD_STEP;
}

struct TrafficCore {
    state: TrafficState,
    rng: Box<dyn RandomSource>,
    /// Bumped by every start and stop; a tick only applies to its own run.
    generation: u64,
}

impl TrafficCore {
    fn tick_for(&mut self, generation: u64) -> ControlFlow<()> {
        if self.generation != generation {
            warn!(generation, current = self.generation, "discarding tick from a stopped run");
            return ControlFlow::Break(());
        }
        apply_tick(&mut self.state, &mut *self.rng);
        debug!(
            total_upload = self.state.total_upload_bytes,
            total_download = self.state.total_download_bytes,
            "traffic tick"
        );
        ControlFlow::Continue(())
    }
}

fn lock(core: &Mutex<TrafficCore>) -> MutexGuard<'_, TrafficCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Autonomous per-application traffic simulation.
///
/// State lives for the lifetime of the engine; `stop` pauses the counters
/// and a later `start` resumes them. Must be used inside a tokio runtime.
pub struct TrafficEngine {
    core: Arc<Mutex<TrafficCore>>,
    tx: Arc<watch::Sender<TrafficState>>,
    period: Duration,
    ticker: Option<Ticker>,
}

impl TrafficEngine {
    pub fn new(config: &SimConfig) -> Self {
        // Offset the seed so a seeded run does not mirror the scanner's draws.
        let seed = config.seed.map(|s| s.wrapping_add(1));
        Self::with_random(config, random::from_seed(seed))
    }

    pub fn with_random(config: &SimConfig, rng: impl RandomSource + 'static) -> Self {
        let state = initial_state();
        let (tx, _rx) = watch::channel(state.clone());
        Self {
            core: Arc::new(Mutex::new(TrafficCore {
                state,
                rng: Box::new(rng),
                generation: 0,
            })),
            tx: Arc::new(tx),
            period: config.traffic_period(),
            ticker: None,
        }
    }

    /// Begin ticking. No-op while already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("traffic engine already running");
            return;
        }
        info!(period = ?self.period, apps = APP_CATALOG.len(), "traffic engine started");

        let generation = {
            let mut core = lock(&self.core);
            core.generation += 1;
            core.generation
        };
        let core = self.core.clone();
        let tx = self.tx.clone();
        self.ticker = Some(Ticker::spawn(self.period, move || {
            let mut core = lock(&core);
            let flow = core.tick_for(generation);
            if flow.is_continue() {
                tx.send_replace(core.state.clone());
            }
            flow
        }));
    }

    /// Halt ticking. No-op when not running.
    pub fn stop(&mut self) {
        if let Some(t) = self.ticker.take() {
            t.cancel();
            lock(&self.core).generation += 1;
            info!("traffic engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    pub fn snapshot(&self) -> TrafficState {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<TrafficState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{ScriptedRandom, SeededRandom};

    #[test]
    fn initial_catalog_is_fixed() {
        let s = initial_state();
        assert_eq!(s.entries.len(), 8);
        assert_eq!(s.entries[0].name, "WhatsApp");
        assert_eq!(s.entries[7].name, "Spotify");
        assert_eq!(s.routed_count(), 8);
        assert_eq!(s.total_upload_bytes, 0.0);
    }

    #[test]
    fn tick_consumes_three_draws_per_app_plus_two() {
        let mut s = initial_state();
        let mut rng = ScriptedRandom::new(vec![0.1]);
        apply_tick(&mut s, &mut rng);
        assert_eq!(rng.draws(), 8 * 3 + 2);
    }

    #[test]
    fn status_reroll_never_blocks() {
        let mut s = initial_state();
        let mut rng = SeededRandom::new(3);
        for _ in 0..200 {
            apply_tick(&mut s, &mut rng);
            assert!(s.entries.iter().all(|e| e.status != AppStatus::Blocked));
        }
    }

    #[test]
    fn high_status_draw_marks_active() {
        let mut s = initial_state();
        let mut rng = ScriptedRandom::new(vec![0.0, 0.0, 0.95]);
        apply_tick(&mut s, &mut rng);
        assert!(s.entries.iter().all(|e| e.status == AppStatus::Active));
        assert_eq!(s.routed_count(), 0);
    }

    #[test]
    fn counters_never_decrease() {
        let mut s = initial_state();
        let mut rng = SeededRandom::new(11);
        for _ in 0..100 {
            let before = s.clone();
            apply_tick(&mut s, &mut rng);
            assert!(s.total_upload_bytes >= before.total_upload_bytes);
            assert!(s.total_download_bytes >= before.total_download_bytes);
            for (a, b) in s.entries.iter().zip(&before.entries) {
                assert_eq!(a.name, b.name);
                assert!(a.upload_bytes >= b.upload_bytes);
                assert!(a.download_bytes >= b.download_bytes);
            }
        }
    }

    #[test]
    fn tick_from_a_stopped_run_is_discarded() {
        let mut core = TrafficCore {
            state: initial_state(),
            rng: Box::new(ScriptedRandom::new(vec![0.5])),
            generation: 1,
        };
        assert!(core.tick_for(1).is_continue());
        let after_one = core.state.clone();
        assert_eq!(after_one.entries[0].upload_bytes, 5.0);

        // stop() moved the run on; the late tick must not land
        core.generation += 1;
        assert!(core.tick_for(1).is_break());
        assert_eq!(core.state, after_one);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_bumps_generation() {
        let cfg = SimConfig::default();
        let mut engine = TrafficEngine::with_random(&cfg, ScriptedRandom::new(vec![0.5]));
        engine.start();
        let running = lock(&engine.core).generation;
        engine.stop();
        assert_ne!(lock(&engine.core).generation, running);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_pauses() {
        let cfg = SimConfig::default();
        let mut engine = TrafficEngine::with_random(&cfg, ScriptedRandom::new(vec![0.5]));
        engine.start();
        engine.start();
        assert!(engine.is_running());

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        // A second ticker would have doubled this.
        assert_eq!(engine.snapshot().entries[0].upload_bytes, 5.0);

        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.snapshot().entries[0].upload_bytes, 5.0);
    }
}
