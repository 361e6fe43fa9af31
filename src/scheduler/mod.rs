//! Non-blocking frame scheduling for the live preview
//!
//! `submit` always returns immediately. It either hands back the last good
//! output, or starts one detached task on the worker pool and then hands back
//! the last good output. A frame that arrives while its pipeline is busy is
//! dropped, never queued.

mod pipeline;
mod state;

pub use pipeline::StreamingProcessor;
pub use state::{BusyGuard, CachedOutput, PipelineKind, PipelineState};

use crate::compose::Compositor;
use crate::config::{ConfigSource, MattingConfig};
use crate::error::MattingResult;
use crate::frame::Frame;
use crate::segmentation::MatteInferenceEngine;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Geometry of the most recent streaming output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub available: bool,
}

/// How long a model-availability check is trusted before the files are
/// looked up again
const AVAILABILITY_REFRESH: Duration = Duration::from_secs(2);

/// Which streaming models were found on disk, and when
#[derive(Debug, Clone, Copy)]
struct Availability {
    recurrent: bool,
    fallback: bool,
    checked: Instant,
}

struct SchedulerInner {
    config: Arc<dyn ConfigSource>,
    processor: StreamingProcessor,
    pipelines: [Arc<PipelineState>; 2],
    active: Mutex<Option<PipelineKind>>,
    availability: Mutex<Option<Availability>>,
    workers: rayon::ThreadPool,
    shut_down: AtomicBool,
}

/// Rate-limited, drop-on-busy scheduler for streaming frames
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
}

impl FrameScheduler {
    pub fn new(
        engine: MatteInferenceEngine,
        compositor: Compositor,
        config: Arc<dyn ConfigSource>,
    ) -> MattingResult<Self> {
        let snapshot = config.snapshot();
        let threads = match snapshot.scheduler.workers {
            0 => num_cpus::get(),
            n => n,
        };
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("livematte-worker-{}", i))
            .panic_handler(|payload| {
                tracing::error!("Streaming task panicked: {}", panic_message(&*payload))
            })
            .build()?;
        tracing::debug!("Frame scheduler using {} worker threads", threads);

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                processor: StreamingProcessor::new(engine, compositor),
                pipelines: PipelineKind::ALL
                    .map(|kind| Arc::new(PipelineState::new(kind, &snapshot.advisor))),
                active: Mutex::new(None),
                availability: Mutex::new(None),
                workers,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    fn pipeline(&self, kind: PipelineKind) -> &Arc<PipelineState> {
        &self.inner.pipelines[kind.index()]
    }

    /// Model availability, re-resolved at most every [`AVAILABILITY_REFRESH`]
    fn availability(&self, now: Instant) -> Availability {
        let mut cached = self.inner.availability.lock();
        match *cached {
            Some(known) if now.saturating_duration_since(known.checked) < AVAILABILITY_REFRESH => {
                known
            }
            _ => {
                let registry = self.inner.processor.engine().pool().registry();
                let fresh = Availability {
                    recurrent: registry.has_recurrent(),
                    fallback: registry.has_live_fallback(),
                    checked: now,
                };
                tracing::debug!(
                    "Streaming models: recurrent={}, fallback={}",
                    fresh.recurrent,
                    fresh.fallback
                );
                *cached = Some(fresh);
                fresh
            }
        }
    }

    /// Pipeline the configuration and available weights call for
    fn select(&self, config: &MattingConfig, now: Instant) -> Option<PipelineKind> {
        let available = self.availability(now);
        if config.streaming_mode.prefers_recurrent() && available.recurrent {
            Some(PipelineKind::Recurrent)
        } else if available.fallback {
            Some(PipelineKind::Fallback)
        } else {
            None
        }
    }

    /// Make `kind` the active pipeline, tearing down the previous one
    fn activate(&self, kind: PipelineKind) {
        let mut active = self.inner.active.lock();
        if *active == Some(kind) {
            return;
        }
        if let Some(previous) = active.replace(kind) {
            tracing::info!("Switching streaming pipeline from {} to {}", previous, kind);
            self.pipeline(previous).reset();
            self.inner
                .processor
                .engine()
                .pool()
                .release(previous.purpose());
        } else {
            tracing::info!("Streaming with {} pipeline", kind);
        }
    }

    /// Submit a frame; returns the bytes to display right now
    ///
    /// That is the last good output when there is one, otherwise the input
    /// unchanged. Never waits for inference.
    pub fn submit(&self, frame: &Frame) -> Vec<u8> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return frame.data.clone();
        }

        let config = self.inner.config.snapshot();
        if !config.enabled {
            return frame.data.clone();
        }
        let now = Instant::now();
        let Some(kind) = self.select(&config, now) else {
            return frame.data.clone();
        };
        self.activate(kind);

        let pipeline = self.pipeline(kind);
        let cached = pipeline.cached_bytes(frame.encoding);

        if cached.is_some() && !pipeline.is_due(kind.interval(&config.scheduler), now) {
            return cached.unwrap_or_else(|| frame.data.clone());
        }

        let Some(guard) = pipeline.try_begin() else {
            return cached.unwrap_or_else(|| frame.data.clone());
        };
        pipeline.mark_started(now);

        let generation = pipeline.generation();
        let owned = frame.clone();
        let inner = Arc::clone(&self.inner);
        let task_pipeline = Arc::clone(pipeline);
        self.inner.workers.spawn(move || {
            let _guard = guard;
            if inner.shut_down.load(Ordering::Acquire) {
                return;
            }
            inner
                .processor
                .run(&task_pipeline, &owned, generation, &config);
        });

        cached.unwrap_or_else(|| frame.data.clone())
    }

    /// Dimensions of the active pipeline's last output, without processing
    pub fn try_get_latest_frame_info(&self) -> FrameInfo {
        let active = *self.inner.active.lock();
        match active.and_then(|kind| self.pipeline(kind).cached_dimensions()) {
            Some((width, height)) => FrameInfo {
                width,
                height,
                available: true,
            },
            None => FrameInfo::default(),
        }
    }

    /// Tasks currently running for `kind` (0 or 1)
    pub fn in_flight(&self, kind: PipelineKind) -> usize {
        self.pipeline(kind).in_flight()
    }

    pub fn active_pipeline(&self) -> Option<PipelineKind> {
        *self.inner.active.lock()
    }

    /// Recurrent state as of the last completed inference
    pub fn recurrent_state(&self) -> crate::inference::RecurrentState {
        self.pipeline(PipelineKind::Recurrent).recurrent_snapshot()
    }

    /// Forget cached output and temporal state of both pipelines; model
    /// availability is looked up again on the next submission
    pub fn reset(&self) {
        for pipeline in &self.inner.pipelines {
            pipeline.reset();
        }
        *self.inner.active.lock() = None;
        *self.inner.availability.lock() = None;
    }

    /// Stop accepting work and release everything; later submissions pass
    /// through unchanged
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down frame scheduler");
        self.reset();
        self.inner.processor.engine().pool().close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

/// Text of a panic payload, when it carries one
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
