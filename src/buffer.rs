//! Native graphics buffers
//!
//! A [`NativeBuffer`] is shared between the engine and the surface subsystem
//! through [`BufferHandle`] (`Arc<NativeBuffer>`); its memory goes away only
//! when the last holder drops its handle. The sequence number is assigned at
//! allocation and survives reallocation and re-attachment to another surface.

use crate::processing::{ColorSpaceInfo, ContentLightLevel, Hdr10Metadata, HdrMetadataType};
use crate::types::{BufferFlag, BufferUsage, PixelFormat, Resolution};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_SEQUENCE: AtomicU32 = AtomicU32::new(1);

/// Shared reference to a native buffer
pub type BufferHandle = Arc<NativeBuffer>;

/// Parameters for requesting a buffer from a producer surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequestConfig {
    pub width: u32,
    pub height: u32,
    /// Row alignment in bytes (power of two)
    pub stride_alignment: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    /// How long `request_buffer` may block waiting for a free slot
    pub timeout: Duration,
}

impl BufferRequestConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Color-space and HDR tags attached to a buffer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferMetadata {
    pub color_space: Option<ColorSpaceInfo>,
    pub hdr_type: HdrMetadataType,
    pub hdr_static: Option<Hdr10Metadata>,
    pub content_light: Option<ContentLightLevel>,
    /// Opaque per-frame dynamic metadata
    pub hdr_dynamic: Option<Vec<u8>>,
}

impl BufferMetadata {
    /// Drop every color-space and HDR key
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Pixel memory and tags of a native buffer
#[derive(Debug)]
pub struct BufferData {
    pub resolution: Resolution,
    /// Row stride of the first plane in bytes
    pub stride: u32,
    pub format: PixelFormat,
    pub usage: BufferUsage,
    pub alignment: u32,
    pub data: Vec<u8>,
    pub metadata: BufferMetadata,
}

impl BufferData {
    fn new(resolution: Resolution, format: PixelFormat, usage: BufferUsage, alignment: u32) -> Self {
        let alignment = alignment.max(1);
        let row = resolution.width * format.bytes_per_sample();
        let stride = row.div_ceil(alignment) * alignment;
        let size = stride as usize * format.storage_rows(resolution.height) as usize;
        Self {
            resolution,
            stride,
            format,
            usage,
            alignment,
            data: vec![0u8; size],
            metadata: BufferMetadata::default(),
        }
    }

    /// Bytes of one pixel row of the first plane, excluding padding
    pub fn row_bytes(&self) -> usize {
        (self.resolution.width * self.format.bytes_per_sample()) as usize
    }

    /// One row of the first plane, excluding padding
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride as usize;
        let len = self.row_bytes();
        &mut self.data[start..start + len]
    }
}

/// A block of pixel memory identified by a stable sequence number
pub struct NativeBuffer {
    seq: u32,
    data: Mutex<BufferData>,
}

impl NativeBuffer {
    /// Allocate a zeroed buffer with a fresh sequence number
    pub fn allocate(config: &BufferRequestConfig) -> BufferHandle {
        Arc::new(Self {
            seq: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            data: Mutex::new(BufferData::new(
                config.resolution(),
                config.format,
                config.usage,
                config.stride_alignment,
            )),
        })
    }

    /// Stable identity of this buffer
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn resolution(&self) -> Resolution {
        self.data.lock().resolution
    }

    pub fn format(&self) -> PixelFormat {
        self.data.lock().format
    }

    pub fn usage(&self) -> BufferUsage {
        self.data.lock().usage
    }

    pub fn stride(&self) -> u32 {
        self.data.lock().stride
    }

    pub fn metadata(&self) -> BufferMetadata {
        self.data.lock().metadata.clone()
    }

    pub fn update_metadata(&self, f: impl FnOnce(&mut BufferMetadata)) {
        f(&mut self.data.lock().metadata);
    }

    /// Lock the pixel memory for reading or writing
    pub fn lock(&self) -> MutexGuard<'_, BufferData> {
        self.data.lock()
    }

    /// Reallocate to new geometry, keeping the sequence number.
    ///
    /// Stale color-space/HDR tags are cleared. Returns false when the buffer
    /// already has the requested geometry.
    pub fn reallocate(&self, resolution: Resolution, format: PixelFormat) -> bool {
        let mut data = self.data.lock();
        if data.resolution == resolution && data.format == format {
            return false;
        }
        *data = BufferData::new(resolution, format, data.usage, data.alignment);
        true
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("NativeBuffer")
            .field("seq", &self.seq)
            .field("resolution", &data.resolution)
            .field("format", &data.format)
            .finish()
    }
}

struct FenceState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// Completion sync primitive for hardware work on a buffer.
///
/// The default fence is already signaled.
#[derive(Clone, Default)]
pub struct Fence(Option<Arc<FenceState>>);

impl Fence {
    /// A fence that never blocks
    pub fn signaled() -> Self {
        Fence(None)
    }

    /// A fence that blocks waiters until [`Fence::signal`] is called
    pub fn pending() -> Self {
        Fence(Some(Arc::new(FenceState {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        })))
    }

    pub fn signal(&self) {
        if let Some(state) = &self.0 {
            *state.signaled.lock() = true;
            state.cond.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.0.as_ref().map(|s| *s.signaled.lock()).unwrap_or(true)
    }

    /// Wait up to `timeout`; returns whether the fence is signaled
    pub fn wait(&self, timeout: Duration) -> bool {
        let Some(state) = &self.0 else {
            return true;
        };
        let mut signaled = state.signaled.lock();
        if !*signaled {
            state.cond.wait_while_for(&mut signaled, |s| !*s, timeout);
        }
        *signaled
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.is_signaled()).finish()
    }
}

/// Region of a buffer touched by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Damage {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Damage {
    pub fn full(resolution: Resolution) -> Self {
        Self {
            x: 0,
            y: 0,
            width: resolution.width,
            height: resolution.height,
        }
    }
}

/// Parameters for flushing a filled buffer to a producer surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushConfig {
    pub damage: Damage,
    /// Presentation timestamp
    pub timestamp: i64,
}

/// A buffer as queued inside the engine
#[derive(Debug, Clone, Default)]
pub struct BufferWrapper {
    /// None only for the synthetic end-of-stream input entry
    pub buffer: Option<BufferHandle>,
    pub fence: Fence,
    pub flag: BufferFlag,
    /// Presentation timestamp
    pub timestamp: i64,
}

impl BufferWrapper {
    pub fn new(buffer: BufferHandle, fence: Fence, timestamp: i64) -> Self {
        Self {
            buffer: Some(buffer),
            fence,
            flag: BufferFlag::Normal,
            timestamp,
        }
    }

    /// End-of-stream sentinel carrying no buffer
    pub fn eos() -> Self {
        Self {
            buffer: None,
            fence: Fence::signaled(),
            flag: BufferFlag::Eos,
            timestamp: 0,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flag == BufferFlag::Eos
    }

    pub fn seq(&self) -> Option<u32> {
        self.buffer.as_ref().map(|b| b.seq())
    }
}

#[cfg(test)]
pub(crate) fn test_buffer(width: u32, height: u32, format: PixelFormat) -> BufferHandle {
    NativeBuffer::allocate(&BufferRequestConfig {
        width,
        height,
        stride_alignment: 1,
        format,
        usage: BufferUsage::CPU_READ | BufferUsage::CPU_WRITE,
        timeout: Duration::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(width: u32, height: u32, format: PixelFormat) -> BufferRequestConfig {
        BufferRequestConfig {
            width,
            height,
            stride_alignment: 8,
            format,
            usage: BufferUsage::CPU_READ,
            timeout: Duration::ZERO,
        }
    }

    #[test]
    fn test_allocation_layout() {
        let buffer = NativeBuffer::allocate(&request(5, 4, PixelFormat::Nv12));
        let data = buffer.lock();
        assert_eq!(data.stride, 8);
        assert_eq!(data.data.len(), 8 * 6);
        assert_eq!(data.row_bytes(), 5);
    }

    #[test]
    fn test_sequence_numbers_are_unique() {
        let a = NativeBuffer::allocate(&request(2, 2, PixelFormat::Rgba8888));
        let b = NativeBuffer::allocate(&request(2, 2, PixelFormat::Rgba8888));
        assert_ne!(a.seq(), b.seq());
    }

    #[test]
    fn test_reallocate_keeps_seq_and_clears_metadata() {
        let buffer = NativeBuffer::allocate(&request(4, 4, PixelFormat::Rgba8888));
        let seq = buffer.seq();
        buffer.update_metadata(|m| {
            m.color_space = Some(ColorSpaceInfo::bt2020_pq());
            m.hdr_type = HdrMetadataType::Static;
        });

        assert!(!buffer.reallocate(Resolution::new(4, 4), PixelFormat::Rgba8888));
        assert!(buffer.metadata().color_space.is_some());

        assert!(buffer.reallocate(Resolution::new(8, 2), PixelFormat::Rgba8888));
        assert_eq!(buffer.seq(), seq);
        assert_eq!(buffer.resolution(), Resolution::new(8, 2));
        assert_eq!(buffer.metadata(), BufferMetadata::default());
    }

    #[test]
    fn test_fence_wait() {
        assert!(Fence::signaled().wait(Duration::ZERO));

        let fence = Fence::pending();
        assert!(!fence.wait(Duration::from_millis(1)));

        let other = fence.clone();
        let handle = std::thread::spawn(move || other.signal());
        assert!(fence.wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_eos_wrapper() {
        let eos = BufferWrapper::eos();
        assert!(eos.is_eos());
        assert_eq!(eos.seq(), None);
    }
}
