use super::backend::{ExecutionBackend, GpuCapability};
use super::session::{MatteSession, SessionFactory};
use super::SessionPurpose;
use crate::config::QualityTier;
use crate::error::{MattingError, MattingResult};
use crate::models::{ModelDescriptor, ModelRegistry, ResolvedModel};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// A session shared between the pool and in-flight tasks
pub type SharedSession = Arc<Mutex<Box<dyn MatteSession>>>;

/// A ready session plus what it was built from
#[derive(Clone)]
pub struct AcquiredSession {
    pub session: SharedSession,
    pub descriptor: &'static ModelDescriptor,
    pub backend: ExecutionBackend,
}

impl std::fmt::Debug for AcquiredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredSession")
            .field("model", &self.descriptor.id)
            .field("backend", &self.backend)
            .finish()
    }
}

enum SlotState {
    Uninitialized,
    Initializing,
    Ready(AcquiredSession),
    Failed(String),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Uninitialized),
            ready: Condvar::new(),
        }
    }
}

/// Resets a slot left in `Initializing` if construction unwinds
struct InitGuard<'a> {
    slot: &'a Slot,
    armed: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.slot.state.lock() = SlotState::Failed("initialization aborted".into());
            self.slot.ready.notify_all();
        }
    }
}

/// Owns one lazily created session per [`SessionPurpose`]
pub struct SessionPool {
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn SessionFactory>,
    slots: [Slot; 3],
    gpu: OnceLock<GpuCapability>,
    threads: usize,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(registry: Arc<ModelRegistry>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            registry,
            factory,
            slots: [Slot::new(), Slot::new(), Slot::new()],
            gpu: OnceLock::new(),
            threads: num_cpus::get(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// GPU capability, probed on first use
    pub fn gpu_capability(&self) -> &GpuCapability {
        self.gpu.get_or_init(|| {
            let capability = self.factory.probe_gpu();
            tracing::info!("GPU capability: {:?}", capability);
            capability
        })
    }

    /// Return the session for `purpose`, creating it if needed
    ///
    /// Idempotent while the resolved model stays the same. Callers racing on
    /// first use wait for the one construction in progress.
    pub fn acquire(
        &self,
        purpose: SessionPurpose,
        quality: QualityTier,
        prefer_gpu: bool,
    ) -> MattingResult<AcquiredSession> {
        if self.is_closed() {
            return Err(MattingError::NotReady("session pool is closed".into()));
        }
        let model = self
            .registry
            .resolve(purpose, quality)
            .ok_or(MattingError::Unavailable { purpose })?;

        let slot = &self.slots[purpose.slot()];
        let mut state = slot.state.lock();
        loop {
            match &*state {
                SlotState::Ready(ready) if ready.descriptor.id == model.descriptor.id => {
                    return Ok(ready.clone());
                }
                SlotState::Ready(ready) => {
                    tracing::info!(
                        "Replacing {} session {} with {}",
                        purpose,
                        ready.descriptor.id,
                        model.descriptor.id
                    );
                    *state = SlotState::Uninitialized;
                }
                SlotState::Initializing => slot.ready.wait(&mut state),
                SlotState::Uninitialized | SlotState::Failed(_) => break,
            }
        }
        *state = SlotState::Initializing;
        drop(state);

        let mut guard = InitGuard { slot, armed: true };
        let result = self.build(purpose, &model, prefer_gpu);
        guard.armed = false;

        let mut state = slot.state.lock();
        if self.is_closed() {
            // Closed while building: nobody may keep this session
            *state = SlotState::Uninitialized;
            slot.ready.notify_all();
            return Err(MattingError::NotReady("session pool is closed".into()));
        }
        *state = match &result {
            Ok(acquired) => SlotState::Ready(acquired.clone()),
            Err(e) => {
                tracing::warn!("Failed to create {} session: {}", purpose, e);
                SlotState::Failed(e.to_string())
            }
        };
        slot.ready.notify_all();
        result
    }

    fn build(
        &self,
        purpose: SessionPurpose,
        model: &ResolvedModel,
        prefer_gpu: bool,
    ) -> MattingResult<AcquiredSession> {
        let _span = tracing::debug_span!("session_init", %purpose).entered();

        if prefer_gpu && model.descriptor.prefers_gpu {
            match self.gpu_capability() {
                GpuCapability::Available => {
                    match self.factory.create(model, ExecutionBackend::Gpu, self.threads) {
                        Ok(session) => return Ok(self.wrap(model, session)),
                        Err(e) => tracing::warn!(
                            "GPU session for {} failed, falling back to CPU: {}",
                            model.descriptor.id,
                            e
                        ),
                    }
                }
                GpuCapability::Unavailable(reason) => {
                    tracing::info!("Using CPU for {}: {}", model.descriptor.id, reason)
                }
            }
        }

        let session = self
            .factory
            .create(model, ExecutionBackend::Cpu, self.threads)?;
        Ok(self.wrap(model, session))
    }

    fn wrap(&self, model: &ResolvedModel, session: Box<dyn MatteSession>) -> AcquiredSession {
        let backend = session.backend();
        tracing::info!("{} session ready on {}", model.descriptor.id, backend);
        AcquiredSession {
            session: Arc::new(Mutex::new(session)),
            descriptor: model.descriptor,
            backend,
        }
    }

    /// Current session without creating one
    pub fn current(&self, purpose: SessionPurpose) -> Option<AcquiredSession> {
        match &*self.slots[purpose.slot()].state.lock() {
            SlotState::Ready(ready) => Some(ready.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self, purpose: SessionPurpose) -> bool {
        self.current(purpose).is_some()
    }

    /// Block until `purpose` leaves `Initializing`; true if it ended `Ready`
    pub fn wait_ready(&self, purpose: SessionPurpose, timeout: Duration) -> bool {
        let slot = &self.slots[purpose.slot()];
        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock();
        while matches!(*state, SlotState::Initializing) {
            if slot.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        matches!(*state, SlotState::Ready(_))
    }

    /// Last construction error for `purpose`, if it failed
    pub fn failure(&self, purpose: SessionPurpose) -> Option<String> {
        match &*self.slots[purpose.slot()].state.lock() {
            SlotState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Dispose the session for `purpose`; in-flight users keep their handle
    pub fn release(&self, purpose: SessionPurpose) {
        let slot = &self.slots[purpose.slot()];
        let mut state = slot.state.lock();
        if matches!(*state, SlotState::Ready(_) | SlotState::Failed(_)) {
            tracing::info!("Releasing {} session", purpose);
            *state = SlotState::Uninitialized;
        }
    }

    pub fn release_all(&self) {
        for purpose in SessionPurpose::ALL {
            self.release(purpose);
        }
    }

    /// Release every session and refuse to build new ones
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("Closing session pool");
        }
        self.release_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
