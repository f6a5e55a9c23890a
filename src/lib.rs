//! GhostProc: asynchronous video frame processing engine
//!
//! Moves native graphics buffers from an upstream producer, through a
//! per-frame transform, to a downstream consumer, with the output surface
//! replaceable while frames keep flowing.
//!
//! # Features
//!
//! - **Transforms**: colorspace conversion with HDR to SDR tonemapping, HDR
//!   metadata generation, detail enhancement
//! - **Surfaces**: pluggable surface subsystem, in-process buffer queues included
//! - **Hot swap**: replace the output surface without stopping the pipeline
//!
//! # Example
//!
//! ```rust,no_run
//! use ghostproc::{BufferQueue, ChannelCallback, TransformConfig, TransformKind, VideoProcessor};
//! use std::sync::Arc;
//!
//! fn main() -> ghostproc::Result<()> {
//!     let engine = VideoProcessor::new(TransformKind::EnhanceDetail);
//!     engine.init()?;
//!
//!     let (callback, events) = ChannelCallback::new();
//!     engine.set_callback(Arc::new(callback))?;
//!     let upstream = engine.create_input_surface()?;
//!     let display = BufferQueue::new("display");
//!     engine.set_output_surface(display.producer())?;
//!     engine.configure(TransformConfig::default_for(TransformKind::EnhanceDetail))?;
//!     engine.prepare()?;
//!     engine.start()?;
//!
//!     // Push frames into `upstream`, then answer each
//!     // `OutputBufferAvailable` event with `release_output_buffer`
//!     # let _ = (upstream, events);
//!     engine.release()
//! }
//! ```

pub mod buffer;
pub mod callback;
pub mod config;
pub mod engine;
pub mod error;
pub mod processing;
pub mod surface;
pub mod types;

// Re-exports for convenience
pub use buffer::{BufferHandle, BufferRequestConfig, BufferWrapper, Fence, NativeBuffer};
pub use callback::{CallbackEvent, CallbackEvents, ChannelCallback, ProcessorCallback};
pub use config::{
    ColorSpaceConfig, DetailConfig, EngineConfig, MetadataAlgorithm, MetadataConfig,
    QualityLevel, RenderIntent, TransformConfig,
};
pub use engine::{QueueCounts, VideoProcessor, VideoProcessorBuilder};
pub use error::{Error, ErrorCode, Result};
pub use processing::{
    BackendFactory, ColorSpaceInfo, Hdr10Metadata, HdrMetadataType, TransferFunction,
    TransformBackend, TransformKind,
};
pub use surface::{BufferQueue, DrainingSink, Surface, SurfaceError, SurfaceFactory};
pub use types::{BufferFlag, LifecycleState, OutputFormat, PixelFormat, ProcessorStats, Resolution};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
