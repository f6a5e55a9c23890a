//! Surface subsystem contract
//!
//! A surface is a queue of native buffers with two ends:
//! - consumer role: acquires filled buffers and releases them back
//! - producer role: requests empty buffers, fills them and flushes them
//!
//! The engine consumes from its input surface and produces into its output
//! surface. [`queue::BufferQueue`] is an in-process implementation of both
//! roles.

pub mod queue;
mod sink;

pub use queue::{BufferQueue, QueueSurfaceFactory};
pub use sink::DrainingSink;

use crate::buffer::{BufferHandle, BufferRequestConfig, Damage, Fence, FlushConfig};
use crate::types::{ScalingMode, TransformMode};

use std::sync::Arc;
use thiserror::Error;

/// Result type for surface calls
pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

/// Surface subsystem failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("No buffer available")]
    NoBuffer,

    #[error("Timed out waiting for a free buffer")]
    Timeout,

    #[error("Operation not supported by a {0:?} surface")]
    WrongRole(SurfaceRole),

    #[error("Buffer {0} does not belong to this surface")]
    UnknownBuffer(u32),

    #[error("Surface is not connected")]
    NotConnected,
}

/// Which end of the queue a surface handle represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    Consumer,
    Producer,
}

/// Notified when a producer flushed a buffer into the queue
pub trait ConsumerListener: Send + Sync {
    fn on_buffer_available(&self);
}

/// Notified when the consumer released a buffer back to the producer
pub trait ReleaseListener: Send + Sync {
    fn on_buffer_released(&self);
}

/// A buffer acquired from a consumer surface
#[derive(Debug, Clone)]
pub struct AcquiredBuffer {
    pub buffer: BufferHandle,
    pub fence: Fence,
    pub timestamp: i64,
    pub damage: Damage,
}

/// One end of a buffer queue.
///
/// Listeners are invoked on the thread that triggered them, after the
/// surface released its own locks. A listener must not synchronously call
/// back into the surface operation that triggered it.
pub trait Surface: Send + Sync {
    /// Identity shared by both ends of the same queue
    fn unique_id(&self) -> u64;

    fn name(&self) -> &str;

    fn role(&self) -> SurfaceRole;

    // Consumer role

    fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) -> SurfaceResult<()>;

    fn unregister_consumer_listener(&self) -> SurfaceResult<()>;

    fn acquire_buffer(&self) -> SurfaceResult<AcquiredBuffer>;

    fn release_buffer(&self, buffer: &BufferHandle, fence: Fence) -> SurfaceResult<()>;

    // Producer role

    fn register_release_listener(&self, listener: Arc<dyn ReleaseListener>) -> SurfaceResult<()>;

    fn unregister_release_listener(&self) -> SurfaceResult<()>;

    fn set_queue_size(&self, size: u32) -> SurfaceResult<()>;

    fn queue_size(&self) -> u32;

    fn request_buffer(&self, config: &BufferRequestConfig) -> SurfaceResult<(BufferHandle, Fence)>;

    fn flush_buffer(
        &self,
        buffer: &BufferHandle,
        fence: Fence,
        config: &FlushConfig,
    ) -> SurfaceResult<()>;

    /// Adopt a buffer allocated elsewhere as dequeued by this producer
    fn attach_buffer(&self, buffer: &BufferHandle) -> SurfaceResult<()>;

    fn connect(&self) -> SurfaceResult<()>;

    /// Drop every cached buffer not currently in use
    fn clean_cache(&self) -> SurfaceResult<()>;

    // Presentation hints (both roles)

    fn transform(&self) -> TransformMode;

    fn set_transform(&self, transform: TransformMode) -> SurfaceResult<()>;

    fn scaling_mode(&self) -> ScalingMode;

    fn set_scaling_mode(&self, mode: ScalingMode) -> SurfaceResult<()>;
}

/// Both ends of a newly created queue
pub struct SurfacePair {
    pub consumer: Arc<dyn Surface>,
    pub producer: Arc<dyn Surface>,
}

/// Creates the engine's input surface
pub trait SurfaceFactory: Send + Sync {
    /// Create a queue owned by a consumer named `name`, plus its producer end
    fn create_queue(&self, name: &str) -> SurfaceResult<SurfacePair>;
}
