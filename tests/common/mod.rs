//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use ghostproc::buffer::{BufferHandle, Damage, FlushConfig};
use ghostproc::surface::{
    AcquiredBuffer, ConsumerListener, QueueSurfaceFactory, ReleaseListener, SurfacePair,
    SurfaceResult, SurfaceRole,
};
use ghostproc::types::{BufferUsage, ScalingMode, TransformMode};
use ghostproc::{
    BackendFactory, BufferFlag, BufferQueue, BufferRequestConfig, CallbackEvent, CallbackEvents,
    ChannelCallback, EngineConfig, Fence, LifecycleState, NativeBuffer, PixelFormat, Surface,
    SurfaceError, SurfaceFactory, TransformBackend, TransformConfig, TransformKind, VideoProcessor,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// An engine wired to a callback channel, an upstream producer and an
/// output queue nobody drains unless the test does it
pub struct Harness {
    pub engine: Arc<VideoProcessor>,
    pub events: CallbackEvents,
    pub upstream: Arc<dyn Surface>,
    pub display: Arc<BufferQueue>,
}

impl Harness {
    /// Engine of `kind` driven all the way to RUNNING
    pub fn running(kind: TransformKind) -> Self {
        Self::running_with(VideoProcessor::builder(kind).build().unwrap())
    }

    pub fn running_with(engine: VideoProcessor) -> Self {
        let harness = Self::configured_with(engine);
        harness.engine.start().unwrap();
        harness
    }

    /// Engine with every prerequisite set, in CONFIGURED
    pub fn configured_with(engine: VideoProcessor) -> Self {
        engine.init().unwrap();
        let (callback, events) = ChannelCallback::new();
        engine.set_callback(Arc::new(callback)).unwrap();
        let upstream = engine.create_input_surface().unwrap();
        let display = BufferQueue::new("display");
        engine.set_output_surface(display.producer()).unwrap();
        engine
            .configure(TransformConfig::default_for(engine.kind()))
            .unwrap();
        engine.prepare().unwrap();
        assert_eq!(engine.state(), LifecycleState::Configured);

        Self {
            engine: Arc::new(engine),
            events,
            upstream,
            display,
        }
    }

    /// Push one RGBA frame upstream
    pub fn push(&self, width: u32, height: u32, timestamp: i64) -> u32 {
        push_frame(&self.upstream, width, height, PixelFormat::Rgba8888, timestamp)
    }

    /// Push one RGBA frame whose producer fence is still pending
    pub fn push_fenced(&self, width: u32, height: u32, timestamp: i64) -> Fence {
        let fence = Fence::pending();
        push_frame_with_fence(
            &self.upstream,
            width,
            height,
            PixelFormat::Rgba8888,
            timestamp,
            fence.clone(),
        );
        fence
    }

    /// Wait until the worker has taken the only queued frame
    pub fn wait_frame_taken(&self) {
        assert!(
            wait_until(|| {
                self.engine.stats().frames_acquired == 1
                    && self.engine.queue_counts().input_available == 0
            }),
            "Worker never picked up the frame"
        );
    }

    /// Next `OutputBufferAvailable`, skipping other events
    pub fn next_output(&self) -> (u32, BufferFlag) {
        match self.events.wait_for(test_timeout(), |e| {
            matches!(e, CallbackEvent::OutputBufferAvailable { .. })
        }) {
            Some(CallbackEvent::OutputBufferAvailable { index, flag }) => (index, flag),
            other => panic!("Expected an output buffer, got {:?}", other),
        }
    }
}

/// Request, fill and flush one frame into `upstream`; returns its sequence number
pub fn push_frame(
    upstream: &Arc<dyn Surface>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: i64,
) -> u32 {
    push_frame_with_fence(upstream, width, height, format, timestamp, Fence::signaled())
}

pub fn push_frame_with_fence(
    upstream: &Arc<dyn Surface>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: i64,
    fence: Fence,
) -> u32 {
    let request = BufferRequestConfig {
        width,
        height,
        stride_alignment: 8,
        format,
        usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE,
        timeout: test_timeout(),
    };
    let (buffer, _) = upstream.request_buffer(&request).unwrap();
    {
        let mut data = buffer.lock();
        for (i, byte) in data.data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
    }
    let flush = FlushConfig {
        damage: Damage::full(buffer.resolution()),
        timestamp,
    };
    upstream
        .flush_buffer(&buffer, fence, &flush)
        .unwrap();
    buffer.seq()
}

/// Signal `fence` from another thread after `delay`
pub fn signal_after(fence: Fence, delay: Duration) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        fence.signal();
    })
}

/// Poll `cond` until it holds or the test timeout expires
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Backend whose every frame fails
pub struct FailingBackend {
    kind: TransformKind,
    config: TransformConfig,
}

impl TransformBackend for FailingBackend {
    fn kind(&self) -> TransformKind {
        self.kind
    }

    fn set_parameter(&mut self, config: &TransformConfig) -> ghostproc::Result<()> {
        self.config = *config;
        Ok(())
    }

    fn parameter(&self) -> ghostproc::Result<TransformConfig> {
        Ok(self.config)
    }

    fn process(&mut self, _input: &NativeBuffer, _output: &NativeBuffer) -> ghostproc::Result<()> {
        Err(ghostproc::Error::Backend("Simulated failure".into()))
    }
}

pub struct FailingBackends;

impl BackendFactory for FailingBackends {
    fn create(&self, kind: TransformKind) -> ghostproc::Result<Box<dyn TransformBackend>> {
        Ok(Box::new(FailingBackend {
            kind,
            config: TransformConfig::default_for(kind),
        }))
    }
}

/// Engine config with a small output pool
pub fn small_pool(count: u32) -> EngineConfig {
    EngineConfig::default().with_output_buffer_count(count)
}

/// Consumer that acquires and releases every buffer from inside the
/// frame-available notification, on the flushing thread
pub struct InlineConsumer {
    queue: Weak<BufferQueue>,
    pub presented: AtomicUsize,
}

impl InlineConsumer {
    pub fn attach(queue: &Arc<BufferQueue>) -> Arc<Self> {
        let consumer = Arc::new(Self {
            queue: Arc::downgrade(queue),
            presented: AtomicUsize::new(0),
        });
        queue
            .consumer()
            .register_consumer_listener(consumer.clone())
            .unwrap();
        consumer
    }
}

impl ConsumerListener for InlineConsumer {
    fn on_buffer_available(&self) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        let surface = queue.consumer();
        while let Ok(acquired) = surface.acquire_buffer() {
            surface
                .release_buffer(&acquired.buffer, acquired.fence)
                .unwrap();
            self.presented.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Surface wrapper whose buffer attach or release can be made to fail
pub struct FlakySurface {
    inner: Arc<dyn Surface>,
    pub fail_attach: AtomicBool,
    pub fail_release: AtomicBool,
    pub failed_releases: AtomicUsize,
}

impl FlakySurface {
    pub fn new(inner: Arc<dyn Surface>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_attach: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            failed_releases: AtomicUsize::new(0),
        })
    }
}

/// Input queues whose consumer end is a [`FlakySurface`]
#[derive(Default)]
pub struct FlakyInputs {
    pub consumer: Mutex<Option<Arc<FlakySurface>>>,
}

impl SurfaceFactory for FlakyInputs {
    fn create_queue(&self, name: &str) -> SurfaceResult<SurfacePair> {
        let pair = QueueSurfaceFactory::default().create_queue(name)?;
        let consumer = FlakySurface::new(pair.consumer);
        *self.consumer.lock() = Some(consumer.clone());
        Ok(SurfacePair {
            consumer,
            producer: pair.producer,
        })
    }
}

impl Surface for FlakySurface {
    fn unique_id(&self) -> u64 {
        self.inner.unique_id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn role(&self) -> SurfaceRole {
        self.inner.role()
    }

    fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) -> SurfaceResult<()> {
        self.inner.register_consumer_listener(listener)
    }

    fn unregister_consumer_listener(&self) -> SurfaceResult<()> {
        self.inner.unregister_consumer_listener()
    }

    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer> {
        self.inner.acquire_buffer()
    }

    fn release_buffer(&self, buffer: &BufferHandle, fence: Fence) -> SurfaceResult<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            self.failed_releases.fetch_add(1, Ordering::SeqCst);
            return Err(SurfaceError::UnknownBuffer(buffer.seq()));
        }
        self.inner.release_buffer(buffer, fence)
    }

    fn register_release_listener(&self, listener: Arc<dyn ReleaseListener>) -> SurfaceResult<()> {
        self.inner.register_release_listener(listener)
    }

    fn unregister_release_listener(&self) -> SurfaceResult<()> {
        self.inner.unregister_release_listener()
    }

    fn set_queue_size(&self, size: u32) -> SurfaceResult<()> {
        self.inner.set_queue_size(size)
    }

    fn queue_size(&self) -> u32 {
        self.inner.queue_size()
    }

    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<(BufferHandle, Fence)> {
        self.inner.request_buffer(config)
    }

    fn flush_buffer(
        &self,
        buffer: &BufferHandle,
        fence: Fence,
        config: &FlushConfig,
    ) -> SurfaceResult<()> {
        self.inner.flush_buffer(buffer, fence, config)
    }

    fn attach_buffer(&self, buffer: &BufferHandle) -> SurfaceResult<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(SurfaceError::UnknownBuffer(buffer.seq()));
        }
        self.inner.attach_buffer(buffer)
    }

    fn connect(&self) -> SurfaceResult<()> {
        self.inner.connect()
    }

    fn clean_cache(&self) -> SurfaceResult<()> {
        self.inner.clean_cache()
    }

    fn transform(&self) -> TransformMode {
        self.inner.transform()
    }

    fn set_transform(&self, transform: TransformMode) -> SurfaceResult<()> {
        self.inner.set_transform(transform)
    }

    fn scaling_mode(&self) -> ScalingMode {
        self.inner.scaling_mode()
    }

    fn set_scaling_mode(&self, mode: ScalingMode) -> SurfaceResult<()> {
        self.inner.set_scaling_mode(mode)
    }
}
