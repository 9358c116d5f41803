use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{SimConfig, MAX_HISTORY_CAPACITY};
use crate::history::BoundedHistory;
use crate::random::{self, RandomSource};
use crate::ticker::Ticker;
use crate::types::{EndpointRecord, EndpointState, ScanState, ServiceLabel, SCAN_PORTS};

/// Upper bound of the per-tick progress increment.
const MAX_PROGRESS_STEP: f64 = 10.0;
/// A tick discovers an endpoint when its gate draw exceeds this.
const DISCOVERY_GATE: f64 = 0.7;
/// A discovered endpoint is open when its state draw exceeds this.
const OPEN_GATE: f64 = 0.3;
const MIN_LATENCY_MS: u32 = 10;
const LATENCY_SPREAD_MS: u32 = 200;

/// Synthesize one endpoint from six unit draws: two octets, port, state,
/// latency and service, in that order.
///
/// Only `Open` and `Filtered` are ever produced.
pub fn synthesize_endpoint(rng: &mut dyn RandomSource) -> EndpointRecord {
    let a = rng.next_below(255);
    let b = rng.next_below(255);
    let port = *random::pick(rng, &SCAN_PORTS);
    let state = if rng.next_unit() > OPEN_GATE {
        EndpointState::Open
    } else {
        EndpointState::Filtered
    };
    let latency_ms = rng.next_below(LATENCY_SPREAD_MS) + MIN_LATENCY_MS;
    let service = *random::pick(rng, &ServiceLabel::ALL);

    EndpointRecord {
        address: format!("192.168.{a}.{b}"),
        port,
        state,
        latency_ms,
        service: Some(service),
    }
}

/// Scan state plus the randomness that drives it. The engine's ticker is
/// the only caller of [`ScanCore::tick`].
pub struct ScanCore {
    progress: f64,
    active: bool,
    discovered: BoundedHistory<EndpointRecord>,
    selected: Option<EndpointRecord>,
    generation: u64,
    rng: Box<dyn RandomSource>,
}

impl ScanCore {
    /// `capacity` is clamped to `1..=MAX_HISTORY_CAPACITY`.
    pub fn new(capacity: usize, rng: Box<dyn RandomSource>) -> Self {
        Self {
            progress: 0.0,
            active: false,
            discovered: BoundedHistory::new(capacity.clamp(1, MAX_HISTORY_CAPACITY)),
            selected: None,
            generation: 0,
            rng,
        }
    }

    /// Reset progress and discoveries for a fresh scan and mark it active.
    /// Returns the new scan generation. The selected endpoint survives.
    pub fn begin(&mut self) -> u64 {
        self.progress = 0.0;
        self.discovered.clear();
        self.active = true;
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn capacity(&self) -> usize {
        self.discovered.capacity()
    }

    /// Advance the scan by one step. Returns `Break` once the scan is
    /// complete (or was not running).
    pub fn tick(&mut self) -> ControlFlow<()> {
        if !self.active {
            return ControlFlow::Break(());
        }

        let next = self.progress + self.rng.next_unit() * MAX_PROGRESS_STEP;

        if self.rng.next_unit() > DISCOVERY_GATE {
            let record = synthesize_endpoint(&mut *self.rng);
            debug!(address = %record.address, port = record.port, state = record.state.as_str(), "endpoint discovered");
            self.discovered.push(record);
        }

        if next >= 100.0 {
            self.progress = 100.0;
            self.active = false;
            ControlFlow::Break(())
        } else {
            self.progress = next;
            ControlFlow::Continue(())
        }
    }

    /// Select `record` if it is open and currently listed in `discovered`;
    /// anything else is ignored.
    pub fn select(&mut self, record: &EndpointRecord) -> bool {
        if !record.is_open() || !self.discovered.iter().any(|r| r == record) {
            return false;
        }
        self.selected = Some(record.clone());
        true
    }

    pub fn disconnect(&mut self) {
        self.selected = None;
    }

    pub fn snapshot(&self) -> ScanState {
        ScanState {
            progress_percent: self.progress,
            is_active: self.active,
            discovered: self.discovered.to_vec(),
            selected_endpoint: self.selected.clone(),
        }
    }
}

fn lock(core: &Mutex<ScanCore>) -> MutexGuard<'_, ScanCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated progressive scan.
///
/// Owns at most one live ticker. Snapshots are published to subscribers
/// after every tick and every command. Must be used inside a tokio runtime.
pub struct ScanEngine {
    core: Arc<Mutex<ScanCore>>,
    tx: Arc<watch::Sender<ScanState>>,
    period: Duration,
    ticker: Option<Ticker>,
}

impl ScanEngine {
    pub fn new(config: &SimConfig) -> Self {
        Self::with_random(config, random::from_seed(config.seed))
    }

    pub fn with_random(config: &SimConfig, rng: impl RandomSource + 'static) -> Self {
        let core = ScanCore::new(config.history_capacity(), Box::new(rng));
        let (tx, _rx) = watch::channel(core.snapshot());
        Self {
            core: Arc::new(Mutex::new(core)),
            tx: Arc::new(tx),
            period: config.scan_period(),
            ticker: None,
        }
    }

    /// Start a fresh scan, replacing any scan in progress.
    pub fn start_scan(&mut self) {
        if let Some(old) = self.ticker.take() {
            old.cancel();
        }

        let (generation, capacity) = {
            let mut core = lock(&self.core);
            let generation = core.begin();
            self.tx.send_replace(core.snapshot());
            (generation, core.capacity())
        };
        info!(generation, capacity, period = ?self.period, "scan started");

        let core = self.core.clone();
        let tx = self.tx.clone();
        self.ticker = Some(Ticker::spawn(self.period, move || {
            let mut core = lock(&core);
            if core.generation() != generation {
                warn!(generation, current = core.generation(), "discarding tick from a replaced scan");
                return ControlFlow::Break(());
            }
            let flow = core.tick();
            let snap = core.snapshot();
            if flow.is_break() {
                info!(
                    generation,
                    discovered = snap.discovered.len(),
                    open = snap.open_count(),
                    "scan complete"
                );
            }
            tx.send_replace(snap);
            flow
        }));
    }

    /// Connect to `record` if it is open and in the current discoveries.
    /// Returns whether the selection changed.
    pub fn select_endpoint(&self, record: &EndpointRecord) -> bool {
        let mut core = lock(&self.core);
        if !core.select(record) {
            debug!(address = %record.address, state = record.state.as_str(), "ignoring selection of non-open or unknown endpoint");
            return false;
        }
        info!(address = %record.address, port = record.port, "connected to endpoint");
        self.tx.send_replace(core.snapshot());
        true
    }

    pub fn disconnect(&self) {
        let mut core = lock(&self.core);
        core.disconnect();
        info!("disconnected");
        self.tx.send_replace(core.snapshot());
    }

    pub fn snapshot(&self) -> ScanState {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.tx.subscribe()
    }

    /// True while a tick schedule is live.
    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }
}
