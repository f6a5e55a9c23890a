//! In-process buffer queue
//!
//! Implements both surface roles over one shared slot table. Buffers cycle
//! Free -> Dequeued (producer) -> Queued -> Acquired (consumer) -> Free.

use super::{
    AcquiredBuffer, ConsumerListener, ReleaseListener, Surface, SurfaceError, SurfaceFactory,
    SurfacePair, SurfaceResult, SurfaceRole,
};
use crate::buffer::{BufferHandle, BufferRequestConfig, Damage, Fence, FlushConfig, NativeBuffer};
use crate::types::{ScalingMode, TransformMode};

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Dequeued,
    Queued,
    Acquired,
}

struct Slot {
    buffer: BufferHandle,
    state: SlotState,
}

struct QueuedBuffer {
    seq: u32,
    fence: Fence,
    timestamp: i64,
    damage: Damage,
}

struct QueueState {
    slots: HashMap<u32, Slot>,
    free: VecDeque<u32>,
    queued: VecDeque<QueuedBuffer>,
    queue_size: u32,
    connected: bool,
    consumer_listener: Option<Arc<dyn ConsumerListener>>,
    release_listener: Option<Arc<dyn ReleaseListener>>,
    transform: TransformMode,
    scaling_mode: ScalingMode,
}

/// Shared state behind both ends of an in-process surface
pub struct BufferQueue {
    id: u64,
    name: String,
    state: Mutex<QueueState>,
    freed: Condvar,
}

impl BufferQueue {
    pub const DEFAULT_QUEUE_SIZE: u32 = 3;

    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: Mutex::new(QueueState {
                slots: HashMap::new(),
                free: VecDeque::new(),
                queued: VecDeque::new(),
                queue_size: Self::DEFAULT_QUEUE_SIZE,
                connected: false,
                consumer_listener: None,
                release_listener: None,
                transform: TransformMode::default(),
                scaling_mode: ScalingMode::default(),
            }),
            freed: Condvar::new(),
        })
    }

    /// Create a queue and hand out both of its ends
    pub fn create_pair(name: impl Into<String>) -> SurfacePair {
        let queue = Self::new(name);
        SurfacePair {
            consumer: queue.consumer(),
            producer: queue.producer(),
        }
    }

    pub fn consumer(self: &Arc<Self>) -> Arc<dyn Surface> {
        Arc::new(QueueSurface {
            queue: Arc::clone(self),
            role: SurfaceRole::Consumer,
        })
    }

    pub fn producer(self: &Arc<Self>) -> Arc<dyn Surface> {
        Arc::new(QueueSurface {
            queue: Arc::clone(self),
            role: SurfaceRole::Producer,
        })
    }

    /// Buffers currently known to the queue, in any state
    pub fn cached_buffers(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Buffers flushed by the producer and not yet acquired
    pub fn queued_buffers(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn has_release_listener(&self) -> bool {
        self.state.lock().release_listener.is_some()
    }

    fn request(&self, config: &BufferRequestConfig) -> SurfaceResult<(BufferHandle, Fence)> {
        let deadline = Instant::now() + config.timeout;
        let mut state = self.state.lock();
        state.connected = true;
        loop {
            if let Some(seq) = state.free.pop_front() {
                if let Some(slot) = state.slots.get_mut(&seq) {
                    slot.state = SlotState::Dequeued;
                    slot.buffer.reallocate(config.resolution(), config.format);
                    return Ok((Arc::clone(&slot.buffer), Fence::signaled()));
                }
                continue;
            }

            if (state.slots.len() as u32) < state.queue_size {
                let buffer = NativeBuffer::allocate(config);
                tracing::trace!(queue = %self.name, seq = buffer.seq(), "Allocated buffer");
                state.slots.insert(
                    buffer.seq(),
                    Slot {
                        buffer: Arc::clone(&buffer),
                        state: SlotState::Dequeued,
                    },
                );
                return Ok((buffer, Fence::signaled()));
            }

            if config.timeout.is_zero() {
                return Err(SurfaceError::NoBuffer);
            }
            if self.freed.wait_until(&mut state, deadline).timed_out() {
                return Err(SurfaceError::Timeout);
            }
        }
    }

    fn flush(&self, buffer: &BufferHandle, fence: Fence, config: &FlushConfig) -> SurfaceResult<()> {
        let listener = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(SurfaceError::NotConnected);
            }
            let seq = buffer.seq();
            match state.slots.get_mut(&seq) {
                Some(slot) if slot.state == SlotState::Dequeued => slot.state = SlotState::Queued,
                _ => return Err(SurfaceError::UnknownBuffer(seq)),
            }
            state.queued.push_back(QueuedBuffer {
                seq,
                fence,
                timestamp: config.timestamp,
                damage: config.damage,
            });
            state.consumer_listener.clone()
        };

        if let Some(listener) = listener {
            listener.on_buffer_available();
        }
        Ok(())
    }

    fn acquire(&self) -> SurfaceResult<AcquiredBuffer> {
        let mut state = self.state.lock();
        let queued = state.queued.pop_front().ok_or(SurfaceError::NoBuffer)?;
        let slot = state
            .slots
            .get_mut(&queued.seq)
            .ok_or(SurfaceError::UnknownBuffer(queued.seq))?;
        slot.state = SlotState::Acquired;
        Ok(AcquiredBuffer {
            buffer: Arc::clone(&slot.buffer),
            fence: queued.fence,
            timestamp: queued.timestamp,
            damage: queued.damage,
        })
    }

    fn release(&self, buffer: &BufferHandle) -> SurfaceResult<()> {
        let listener = {
            let mut state = self.state.lock();
            let seq = buffer.seq();
            match state.slots.get_mut(&seq) {
                Some(slot) if slot.state == SlotState::Acquired => slot.state = SlotState::Free,
                _ => return Err(SurfaceError::UnknownBuffer(seq)),
            }
            state.free.push_back(seq);
            self.freed.notify_one();
            state.release_listener.clone()
        };

        if let Some(listener) = listener {
            listener.on_buffer_released();
        }
        Ok(())
    }

    fn attach(&self, buffer: &BufferHandle) {
        let mut state = self.state.lock();
        let seq = buffer.seq();
        state.free.retain(|s| *s != seq);
        state.queued.retain(|q| q.seq != seq);
        state.slots.insert(
            seq,
            Slot {
                buffer: Arc::clone(buffer),
                state: SlotState::Dequeued,
            },
        );
    }

    fn clean_cache(&self) {
        let mut state = self.state.lock();
        state.slots.retain(|_, slot| slot.state != SlotState::Free);
        state.free.clear();
    }
}

/// One end of a [`BufferQueue`]
pub struct QueueSurface {
    queue: Arc<BufferQueue>,
    role: SurfaceRole,
}

impl QueueSurface {
    fn expect_role(&self, role: SurfaceRole) -> SurfaceResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(SurfaceError::WrongRole(self.role))
        }
    }
}

impl Surface for QueueSurface {
    fn unique_id(&self) -> u64 {
        self.queue.id
    }

    fn name(&self) -> &str {
        &self.queue.name
    }

    fn role(&self) -> SurfaceRole {
        self.role
    }

    fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Consumer)?;
        self.queue.state.lock().consumer_listener = Some(listener);
        Ok(())
    }

    fn unregister_consumer_listener(&self) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Consumer)?;
        self.queue.state.lock().consumer_listener = None;
        Ok(())
    }

    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer> {
        self.expect_role(SurfaceRole::Consumer)?;
        self.queue.acquire()
    }

    fn release_buffer(&self, buffer: &BufferHandle, _fence: Fence) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Consumer)?;
        self.queue.release(buffer)
    }

    fn register_release_listener(&self, listener: Arc<dyn ReleaseListener>) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.state.lock().release_listener = Some(listener);
        Ok(())
    }

    fn unregister_release_listener(&self) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.state.lock().release_listener = None;
        Ok(())
    }

    fn set_queue_size(&self, size: u32) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.state.lock().queue_size = size.max(1);
        self.queue.freed.notify_all();
        Ok(())
    }

    fn queue_size(&self) -> u32 {
        self.queue.state.lock().queue_size
    }

    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<(BufferHandle, Fence)> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.request(config)
    }

    fn flush_buffer(
        &self,
        buffer: &BufferHandle,
        fence: Fence,
        config: &FlushConfig,
    ) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.flush(buffer, fence, config)
    }

    fn attach_buffer(&self, buffer: &BufferHandle) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.attach(buffer);
        Ok(())
    }

    fn connect(&self) -> SurfaceResult<()> {
        self.expect_role(SurfaceRole::Producer)?;
        self.queue.state.lock().connected = true;
        Ok(())
    }

    fn clean_cache(&self) -> SurfaceResult<()> {
        self.queue.clean_cache();
        Ok(())
    }

    fn transform(&self) -> TransformMode {
        self.queue.state.lock().transform
    }

    fn set_transform(&self, transform: TransformMode) -> SurfaceResult<()> {
        self.queue.state.lock().transform = transform;
        Ok(())
    }

    fn scaling_mode(&self) -> ScalingMode {
        self.queue.state.lock().scaling_mode
    }

    fn set_scaling_mode(&self, mode: ScalingMode) -> SurfaceResult<()> {
        self.queue.state.lock().scaling_mode = mode;
        Ok(())
    }
}

/// Creates in-process queues for the engine's input surface
#[derive(Debug, Clone, Copy)]
pub struct QueueSurfaceFactory {
    /// Slots available to the upstream producer
    pub queue_size: u32,
}

impl Default for QueueSurfaceFactory {
    fn default() -> Self {
        Self { queue_size: 8 }
    }
}

impl SurfaceFactory for QueueSurfaceFactory {
    fn create_queue(&self, name: &str) -> SurfaceResult<SurfacePair> {
        let pair = BufferQueue::create_pair(name);
        pair.producer.set_queue_size(self.queue_size)?;
        Ok(pair)
    }
}
