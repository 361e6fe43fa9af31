use crate::alpha::ScaleBoost;
use crate::config::{AdvisorConfig, SchedulerConfig};
use crate::frame::FrameEncoding;
use crate::inference::{RecurrentState, SessionPurpose};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The two streaming pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Recurrent video matting with temporal state
    Recurrent,
    /// Stateless live model
    Fallback,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 2] = [PipelineKind::Recurrent, PipelineKind::Fallback];

    pub fn purpose(self) -> SessionPurpose {
        match self {
            PipelineKind::Recurrent => SessionPurpose::Recurrent,
            PipelineKind::Fallback => SessionPurpose::LiveFallback,
        }
    }

    /// Minimum time between two inference starts
    pub fn interval(self, config: &SchedulerConfig) -> Duration {
        match self {
            PipelineKind::Recurrent => config.recurrent_interval(),
            PipelineKind::Fallback => config.fallback_interval(),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            PipelineKind::Recurrent => 0,
            PipelineKind::Fallback => 1,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineKind::Recurrent => "recurrent",
            PipelineKind::Fallback => "fallback",
        })
    }
}

/// Last good streaming output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: FrameEncoding,
}

/// Everything one streaming pipeline remembers between frames
///
/// The busy flag admits a single detached task at a time. That task is the
/// only writer of the recurrent state and the boost; it checks them out
/// briefly instead of holding a lock across inference. A reset bumps the
/// generation so results from tasks started earlier are dropped.
pub struct PipelineState {
    kind: PipelineKind,
    last_started: Mutex<Option<Instant>>,
    busy: AtomicBool,
    in_flight: AtomicUsize,
    cache: RwLock<Option<CachedOutput>>,
    recurrent: Mutex<RecurrentState>,
    boost: Mutex<ScaleBoost>,
    generation: AtomicU64,
}

/// Held by the in-flight task; clears the busy flag when dropped
pub struct BusyGuard {
    state: Arc<PipelineState>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.state.busy.store(false, Ordering::Release);
    }
}

impl PipelineState {
    pub fn new(kind: PipelineKind, advisor: &AdvisorConfig) -> Self {
        Self {
            kind,
            last_started: Mutex::new(None),
            busy: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            cache: RwLock::new(None),
            recurrent: Mutex::new(RecurrentState::zeroed()),
            boost: Mutex::new(ScaleBoost::new(advisor)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Claim the pipeline for one task; `None` if a task is already running
    pub fn try_begin(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(BusyGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether `interval` has passed since the last task started
    pub fn is_due(&self, interval: Duration, now: Instant) -> bool {
        match *self.last_started.lock() {
            Some(started) => now.saturating_duration_since(started) >= interval,
            None => true,
        }
    }

    pub fn mark_started(&self, now: Instant) {
        *self.last_started.lock() = Some(now);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cached bytes, if the cache holds output of this encoding family
    pub fn cached_bytes(&self, encoding: FrameEncoding) -> Option<Vec<u8>> {
        self.cache
            .read()
            .as_ref()
            .filter(|cached| cached.encoding == encoding)
            .map(|cached| cached.bytes.clone())
    }

    pub fn cached_dimensions(&self) -> Option<(u32, u32)> {
        self.cache
            .read()
            .as_ref()
            .map(|cached| (cached.width, cached.height))
    }

    /// Store a result unless a reset happened since `generation`
    pub fn store(&self, output: CachedOutput, generation: u64) -> bool {
        let mut cache = self.cache.write();
        if self.generation() != generation {
            return false;
        }
        *cache = Some(output);
        true
    }

    /// Take the recurrent state for the duration of one inference
    pub fn checkout_recurrent(&self) -> RecurrentState {
        std::mem::take(&mut *self.recurrent.lock())
    }

    /// Put the state back unless a reset happened since `generation`
    pub fn restore_recurrent(&self, state: RecurrentState, generation: u64) {
        let mut slot = self.recurrent.lock();
        if self.generation() == generation {
            *slot = state;
        }
    }

    pub fn recurrent_snapshot(&self) -> RecurrentState {
        self.recurrent.lock().clone()
    }

    pub fn boost_factor(&self) -> f32 {
        self.boost.lock().factor()
    }

    pub fn record_boost(&self, degenerate: bool) {
        self.boost.lock().record(degenerate);
    }

    /// Drop cached output, temporal state and boost
    pub fn reset(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
        drop(cache);

        self.recurrent.lock().reset();
        self.boost.lock().reset();
        *self.last_started.lock() = None;
        tracing::debug!("Reset {} pipeline", self.kind);
    }
}
