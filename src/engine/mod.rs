//! Asynchronous buffer-exchange engine
//!
//! A [`VideoProcessor`] consumes frames from an input surface it creates,
//! runs one [`TransformBackend`] over each frame on a dedicated worker thread,
//! and produces into an output surface supplied by the client:
//!
//! upstream → input surface → input queue ⇄ output queue → backend →
//! delivered → client callback → `release_output_buffer` → output surface
//!
//! Lock domains, in the order they may be nested:
//! lifecycle state → input queue → output-surface swap → output queue.
//! The lifecycle lock is never taken while holding another engine lock, and
//! client callbacks always run with no engine lock held.

mod input;
mod output;
mod queues;
mod scheduler;
mod state;

pub use queues::QueueCounts;

use crate::buffer::BufferWrapper;
use crate::callback::{CallbackEvent, ProcessorCallback};
use crate::config::{EngineConfig, TransformConfig};
use crate::error::{Error, Result};
use crate::processing::{BackendFactory, BuiltinBackends, TransformBackend, TransformKind};
use crate::surface::{QueueSurfaceFactory, Surface, SurfaceFactory};
use crate::types::{LifecycleState, OutputFormat, ProcessorStats};

use crossbeam_channel::{Receiver, Sender};
use input::InputListener;
use output::OutputReleaseListener;
use parking_lot::{Condvar, Mutex};
use queues::{InputQueue, OutputQueue, SurfaceSlot};
use state::{legal, Lifecycle};
use std::sync::Arc;
use std::thread::JoinHandle;

/// State shared between the API handle, the worker and the surface listeners
struct Inner {
    kind: TransformKind,
    config: EngineConfig,
    backend_factory: Arc<dyn BackendFactory>,
    surface_factory: Arc<dyn SurfaceFactory>,

    life: Mutex<Lifecycle>,
    /// Signaled whenever the worker finishes a frame
    idle: Condvar,
    input: Mutex<InputQueue>,
    swap: Mutex<SurfaceSlot>,
    output: Mutex<OutputQueue>,
    backend: Mutex<Option<Box<dyn TransformBackend>>>,
    stats: Mutex<ProcessorStats>,

    /// Worker wake-ups; one pending token is enough
    doorbell: Sender<()>,
    bell: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,

    input_listener: Arc<InputListener>,
    release_listener: Arc<OutputReleaseListener>,
}

impl Inner {
    fn wake(&self) {
        let _ = self.doorbell.try_send(());
    }

    fn count(&self, f: impl FnOnce(&mut ProcessorStats)) {
        f(&mut self.stats.lock());
    }

    fn check_kind(&self, config: &TransformConfig) -> Result<()> {
        if config.kind() != self.kind {
            return Err(Error::InvalidValue(format!(
                "{} parameters given to a {} engine",
                config.kind(),
                self.kind
            )));
        }
        config.validate()
    }

    /// Apply `config` to the backend; a rejection puts the engine in ERROR
    fn apply_parameter(&self, life: &mut Lifecycle, config: &TransformConfig) -> Result<()> {
        let mut backend = self.backend.lock();
        let backend = backend
            .as_mut()
            .ok_or_else(|| Error::Internal("Transform backend not created".into()))?;
        if let Err(e) = backend.set_parameter(config) {
            tracing::error!("Backend rejected parameters: {}", e);
            life.transition(LifecycleState::Error);
            return Err(e);
        }
        life.config = Some(*config);
        Ok(())
    }

    /// Deliver events to the client. Must be called with no engine lock held.
    fn dispatch(&self, events: Vec<CallbackEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(callback) = self.life.lock().callback.clone() else {
            return;
        };
        for event in events {
            match event {
                CallbackEvent::Error(code) => callback.on_error(code),
                CallbackEvent::State(state) => callback.on_state(state),
                CallbackEvent::OutputBufferAvailable { index, flag } => {
                    callback.on_output_buffer_available(index, flag)
                }
                CallbackEvent::OutputFormatChanged(format) => {
                    callback.on_output_format_changed(&format)
                }
            }
        }
    }
}

/// Builder for [`VideoProcessor`]
pub struct VideoProcessorBuilder {
    kind: TransformKind,
    config: EngineConfig,
    backend_factory: Arc<dyn BackendFactory>,
    surface_factory: Arc<dyn SurfaceFactory>,
}

impl VideoProcessorBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply transform backends (defaults to the built-in CPU backends)
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.backend_factory = factory;
        self
    }

    /// Supply the input surface implementation (defaults to in-process queues)
    pub fn surface_factory(mut self, factory: Arc<dyn SurfaceFactory>) -> Self {
        self.surface_factory = factory;
        self
    }

    pub fn build(self) -> Result<VideoProcessor> {
        self.config.validate()?;
        Ok(VideoProcessor::from_parts(
            self.kind,
            self.config,
            self.backend_factory,
            self.surface_factory,
        ))
    }
}

/// One engine instance running a single transform kind.
///
/// Every operation returns a `Result`; state and parameter errors leave the
/// engine unchanged. Downstream consumers may release output buffers from
/// inside their frame-available listener; the worker reclaims them.
pub struct VideoProcessor {
    inner: Arc<Inner>,
}

impl VideoProcessor {
    pub fn builder(kind: TransformKind) -> VideoProcessorBuilder {
        VideoProcessorBuilder {
            kind,
            config: EngineConfig::default(),
            backend_factory: Arc::new(BuiltinBackends),
            surface_factory: Arc::new(QueueSurfaceFactory::default()),
        }
    }

    /// Engine with default configuration and built-in collaborators
    pub fn new(kind: TransformKind) -> Self {
        Self::from_parts(
            kind,
            EngineConfig::default(),
            Arc::new(BuiltinBackends),
            Arc::new(QueueSurfaceFactory::default()),
        )
    }

    fn from_parts(
        kind: TransformKind,
        config: EngineConfig,
        backend_factory: Arc<dyn BackendFactory>,
        surface_factory: Arc<dyn SurfaceFactory>,
    ) -> Self {
        let (doorbell, bell) = crossbeam_channel::bounded(1);
        let inner = Arc::new_cyclic(|weak| Inner {
            kind,
            config,
            backend_factory,
            surface_factory,
            life: Mutex::new(Lifecycle::new()),
            idle: Condvar::new(),
            input: Mutex::new(InputQueue::default()),
            swap: Mutex::new(SurfaceSlot::default()),
            output: Mutex::new(OutputQueue::default()),
            backend: Mutex::new(None),
            stats: Mutex::new(ProcessorStats::default()),
            doorbell,
            bell,
            worker: Mutex::new(None),
            input_listener: Arc::new(InputListener::new(weak.clone())),
            release_listener: Arc::new(OutputReleaseListener::new(weak.clone())),
        });
        Self { inner }
    }

    pub fn kind(&self) -> TransformKind {
        self.inner.kind
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.life.lock().state
    }

    pub fn stats(&self) -> ProcessorStats {
        self.inner.stats.lock().clone()
    }

    /// Sizes of the internal buffer collections
    pub fn queue_counts(&self) -> QueueCounts {
        let input = self.inner.input.lock();
        let output = self.inner.output.lock();
        QueueCounts {
            input_available: input.available.len(),
            output_available: output.available.len(),
            delivered: output.delivered.len(),
            in_flight: output.in_flight.len(),
            attached: output.attached.len(),
        }
    }

    /// Create the backend and spawn the worker thread
    pub fn init(&self) -> Result<()> {
        let inner = &self.inner;
        let mut life = inner.life.lock();
        life.ensure("init", legal::INIT)?;

        *inner.backend.lock() = Some(inner.backend_factory.create(inner.kind)?);
        life.shutdown = false;
        life.processing = false;
        life.stop_notify_pending = false;
        life.clear_eos();

        let worker = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", inner.config.name, inner.kind.short_name()))
            .spawn(move || scheduler::run(worker))?;
        *inner.worker.lock() = Some(handle);

        tracing::info!("{} engine initialized", inner.kind);
        life.transition(LifecycleState::Initialized);
        Ok(())
    }

    pub fn set_callback(&self, callback: Arc<dyn ProcessorCallback>) -> Result<()> {
        let mut life = self.inner.life.lock();
        life.ensure("set_callback", legal::SETUP)?;
        life.callback = Some(callback);
        life.transition(LifecycleState::Configuring);
        Ok(())
    }

    /// Create the input surface; returns the producer end for upstream
    pub fn create_input_surface(&self) -> Result<Arc<dyn Surface>> {
        let mut life = self.inner.life.lock();
        life.ensure("create_input_surface", legal::SETUP)?;
        let producer = self.inner.create_input_surface()?;
        life.transition(LifecycleState::Configuring);
        Ok(producer)
    }

    /// Set the output surface, or hot-swap it while streaming
    pub fn set_output_surface(&self, surface: Arc<dyn Surface>) -> Result<()> {
        self.inner.set_output_surface(surface)
    }

    pub fn configure(&self, config: TransformConfig) -> Result<()> {
        let inner = &self.inner;
        let mut life = inner.life.lock();
        life.ensure("configure", legal::SETUP)?;
        inner.check_kind(&config)?;
        inner.apply_parameter(&mut life, &config)?;
        tracing::info!("Configured {:?}", config);
        life.transition(LifecycleState::Configuring);
        Ok(())
    }

    pub fn prepare(&self) -> Result<()> {
        let inner = &self.inner;
        let mut life = inner.life.lock();
        life.ensure("prepare", legal::PREPARE)?;

        if life.state == LifecycleState::Stopped {
            let stale = {
                let mut input = inner.input.lock();
                let before = input.available.len();
                input.available.retain(|w| !w.is_eos());
                before - input.available.len()
            };
            if stale > 0 {
                tracing::debug!("Dropped {} undelivered end-of-stream marker(s)", stale);
            }
            life.clear_eos();
            life.transition(LifecycleState::Configured);
            return Ok(());
        }

        let mut missing = Vec::new();
        if life.callback.is_none() {
            missing.push("callback");
        }
        if inner.input.lock().surface.is_none() {
            missing.push("input surface");
        }
        if inner.swap.lock().surface.is_none() {
            missing.push("output surface");
        }
        if life.config.is_none() {
            missing.push("configuration");
        }
        if !missing.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "prepare requires {}",
                missing.join(", ")
            )));
        }

        life.transition(LifecycleState::Configured);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut life = inner.life.lock();
            life.ensure("start", legal::START)?;
            life.transition(LifecycleState::Running);
        }
        inner.dispatch(vec![CallbackEvent::State(LifecycleState::Running)]);

        // Frames queued upstream while stopped were never acquired
        inner.pump_input();
        inner.wake();
        Ok(())
    }

    /// Stop pulling frames; a running transform finishes first
    pub fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let notify_now = {
            let mut life = inner.life.lock();
            life.ensure("stop", legal::STOP)?;
            life.transition(LifecycleState::Stopped);
            if life.processing {
                life.stop_notify_pending = true;
                false
            } else {
                true
            }
        };
        if notify_now {
            inner.dispatch(vec![CallbackEvent::State(LifecycleState::Stopped)]);
        }
        Ok(())
    }

    /// Queue the end-of-stream marker behind the frames already accepted
    pub fn notify_eos(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut life = inner.life.lock();
            life.ensure("notify_eos", legal::NOTIFY_EOS)?;
            life.eos_queued = true;
            life.transition(LifecycleState::EosReached);
            inner.input.lock().available.push_back(BufferWrapper::eos());
        }
        inner.wake();
        Ok(())
    }

    /// Return a delivered output buffer, rendering it to the output surface
    /// or recycling it
    pub fn release_output_buffer(&self, index: u32, render: bool) -> Result<()> {
        self.inner.release_output_buffer(index, render)
    }

    /// Drop pending input and reclaim delivered output buffers
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Discard configuration and recreate the backend, keeping callback and surfaces
    pub fn reset(&self) -> Result<()> {
        let inner = &self.inner;
        let pending = {
            let mut life = inner.life.lock();
            life.ensure("reset", legal::RESET)?;
            inner.idle.wait_while(&mut life, |l| l.processing);
            life.ensure("reset", legal::RESET)?;

            let pending = inner.input.lock().take_queued();
            let reclaimed = inner.output.lock().reclaim_delivered();
            tracing::debug!(
                "Reset: {} input buffers returned, {} output buffers reclaimed",
                pending.len(),
                reclaimed
            );

            life.config = None;
            life.output_format = None;
            life.stop_notify_pending = false;
            life.clear_eos();

            match inner.backend_factory.create(inner.kind) {
                Ok(backend) => *inner.backend.lock() = Some(backend),
                Err(e) => {
                    *inner.backend.lock() = None;
                    life.transition(LifecycleState::Error);
                    drop(life);
                    inner.return_inputs(pending);
                    return Err(e);
                }
            }
            life.transition(LifecycleState::Initialized);
            pending
        };
        inner.return_inputs(pending);
        Ok(())
    }

    /// Tear everything down and stop the worker. Terminal until the next `init`.
    pub fn release(&self) -> Result<()> {
        let inner = &self.inner;
        let handle = {
            let mut life = inner.life.lock();
            if life.state == LifecycleState::Uninitialized {
                return Ok(());
            }
            inner.idle.wait_while(&mut life, |l| l.processing);
            life.shutdown = true;
            life.callback = None;
            life.config = None;
            life.output_format = None;
            life.stop_notify_pending = false;
            life.clear_eos();
            life.transition(LifecycleState::Uninitialized);
            inner.worker.lock().take()
        };
        inner.wake();

        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!("{} worker panicked", inner.kind);
            }
        }

        inner.teardown_input();
        inner.teardown_output();
        inner.output.lock().clear();
        *inner.backend.lock() = None;
        tracing::info!("{} engine released", inner.kind);
        Ok(())
    }

    pub fn set_parameter(&self, config: TransformConfig) -> Result<()> {
        let inner = &self.inner;
        let mut life = inner.life.lock();
        life.ensure("set_parameter", legal::SET_PARAMETER)?;
        inner.check_kind(&config)?;
        inner.apply_parameter(&mut life, &config)
    }

    pub fn get_parameter(&self) -> Result<TransformConfig> {
        let inner = &self.inner;
        let life = inner.life.lock();
        life.ensure("get_parameter", legal::GET_PARAMETER)?;
        let backend = inner.backend.lock();
        backend
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("Transform backend not created".into()))?
            .parameter()
    }

    pub fn get_output_format(&self) -> Result<OutputFormat> {
        let life = self.inner.life.lock();
        life.ensure("get_output_format", legal::OUTPUT_FORMAT)?;
        life.output_format
            .clone()
            .ok_or_else(|| Error::InvalidOperation("Output format not known yet".into()))
    }
}

impl Drop for VideoProcessor {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Release on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::ChannelCallback;
    use crate::error::ErrorCode;
    use crate::surface::BufferQueue;

    #[test]
    fn test_operations_before_init_are_rejected() {
        let engine = VideoProcessor::new(TransformKind::EnhanceDetail);
        let err = engine.start().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert!(engine.create_input_surface().is_err());
        assert!(engine.get_parameter().is_err());
        assert_eq!(engine.state(), LifecycleState::Uninitialized);
        assert!(engine.release().is_ok());
    }

    #[test]
    fn test_setup_moves_to_configuring() {
        let engine = VideoProcessor::new(TransformKind::EnhanceDetail);
        engine.init().unwrap();
        assert_eq!(engine.state(), LifecycleState::Initialized);

        let (callback, _events) = ChannelCallback::new();
        engine.set_callback(Arc::new(callback)).unwrap();
        assert_eq!(engine.state(), LifecycleState::Configuring);

        engine.create_input_surface().unwrap();
        let err = engine.create_input_surface().err().expect("second create_input_surface must fail");
        assert_eq!(err.code(), ErrorCode::InvalidOperation);

        engine.release().unwrap();
        assert_eq!(engine.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_configure_rejects_wrong_kind() {
        let engine = VideoProcessor::new(TransformKind::EnhanceDetail);
        engine.init().unwrap();
        let err = engine
            .configure(TransformConfig::default_for(TransformKind::ColorSpaceConvert))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidValue);
        assert_eq!(engine.state(), LifecycleState::Initialized);

        engine
            .configure(TransformConfig::default_for(TransformKind::EnhanceDetail))
            .unwrap();
        assert_eq!(
            engine.get_parameter().unwrap(),
            TransformConfig::default_for(TransformKind::EnhanceDetail)
        );
    }

    #[test]
    fn test_prepare_lists_missing_prerequisites() {
        let engine = VideoProcessor::new(TransformKind::GenerateMetadata);
        engine.init().unwrap();
        let output = BufferQueue::new("display");
        engine.set_output_surface(output.producer()).unwrap();

        let err = engine.prepare().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidOperation);
        assert!(err.to_string().contains("callback"));
        assert!(err.to_string().contains("configuration"));
        assert!(!err.to_string().contains("output surface"));
        assert_eq!(engine.state(), LifecycleState::Configuring);
    }

    #[test]
    fn test_builder_validates_config() {
        let result = VideoProcessor::builder(TransformKind::EnhanceDetail)
            .config(EngineConfig::default().with_output_buffer_count(0))
            .build();
        assert!(result.is_err());
    }
}
