//! Common types used throughout GhostProc

use crate::processing::{ColorSpaceInfo, HdrMetadataType};
use serde::{Deserialize, Serialize};

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    // Common resolutions
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const FHD_1080P: Self = Self::new(1920, 1080);
    pub const UHD_4K: Self = Self::new(3840, 2160);

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Zero-sized geometry is never a valid buffer
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FHD_1080P
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Graphic buffer pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelFormat {
    /// 32-bit RGBA
    #[default]
    Rgba8888,
    /// 32-bit BGRA (common for desktop capture)
    Bgra8888,
    /// 32-bit RGBA with 10-bit color channels and 2-bit alpha (HDR)
    Rgba1010102,
    /// NV12 - Y plane + interleaved UV
    Nv12,
    /// NV21 - Y plane + interleaved VU
    Nv21,
    /// YUV420P - Planar YUV 4:2:0
    Yuv420p,
    /// P010 - 10-bit NV12 (HDR)
    YcbcrP010,
    /// 10-bit NV21 (HDR)
    YcrcbP010,
}

impl PixelFormat {
    /// Bytes per pixel (approximate for planar formats)
    pub fn bytes_per_pixel(&self) -> f32 {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 | PixelFormat::Rgba1010102 => 4.0,
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yuv420p => 1.5,
            PixelFormat::YcbcrP010 | PixelFormat::YcrcbP010 => 3.0,
        }
    }

    /// Bytes per pixel in the first plane (the row stride basis)
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 | PixelFormat::Rgba1010102 => 4,
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yuv420p => 1,
            PixelFormat::YcbcrP010 | PixelFormat::YcrcbP010 => 2,
        }
    }

    /// Packed 4-byte-per-pixel RGB layout
    pub fn is_packed_rgb(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 | PixelFormat::Rgba1010102
        )
    }

    /// Carries more than 8 bits per channel
    pub fn is_10bit(&self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba1010102 | PixelFormat::YcbcrP010 | PixelFormat::YcrcbP010
        )
    }

    /// Number of rows in memory for `height` picture rows (4:2:0 adds half-height chroma)
    pub fn storage_rows(&self, height: u32) -> u32 {
        if self.is_packed_rgb() {
            height
        } else {
            height + height.div_ceil(2)
        }
    }
}

/// Flow-control flag carried by every buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferFlag {
    #[default]
    Normal,
    /// End-of-stream sentinel
    Eos,
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initialized,
    Configuring,
    Configured,
    Running,
    Stopped,
    Flushed,
    EosReached,
    Error,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Configuring => "CONFIGURING",
            LifecycleState::Configured => "CONFIGURED",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Flushed => "FLUSHED",
            LifecycleState::EosReached => "EOS_REACHED",
            LifecycleState::Error => "ERROR",
        }
    }

    /// States in which the output surface can be replaced without stopping
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            LifecycleState::Running | LifecycleState::EosReached | LifecycleState::Flushed
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Buffer usage bits (CPU/GPU access hints)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage(pub u64);

impl BufferUsage {
    pub const CPU_READ: Self = Self(1 << 0);
    pub const CPU_WRITE: Self = Self(1 << 1);
    pub const MEM_DMA: Self = Self(1 << 3);
    pub const HW_RENDER: Self = Self(1 << 8);
    pub const HW_TEXTURE: Self = Self(1 << 9);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Surface transform (rotation/flip) hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransformMode {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipH,
    FlipV,
}

/// Surface scaling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalingMode {
    Freeze,
    #[default]
    ScaleToWindow,
    ScaleCrop,
    NoScaleCrop,
}

/// Format reported to the client for processed output buffers
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFormat {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub color_space: Option<ColorSpaceInfo>,
    pub hdr_metadata_type: HdrMetadataType,
}

/// Counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Frames acquired from the input surface
    pub frames_acquired: u64,
    /// Frames the backend transformed successfully
    pub frames_processed: u64,
    /// Frames the backend failed on (dropped, output recycled)
    pub frames_failed: u64,
    /// Frames returned upstream unprocessed (after EOS, flush, reset)
    pub frames_dropped: u64,
    /// Output buffers flushed to the output surface
    pub buffers_rendered: u64,
    /// `on_output_format_changed` notifications
    pub format_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_rows() {
        assert_eq!(PixelFormat::Rgba8888.storage_rows(1080), 1080);
        assert_eq!(PixelFormat::Nv12.storage_rows(1080), 1620);
        assert_eq!(PixelFormat::YcbcrP010.storage_rows(5), 8);
    }

    #[test]
    fn test_usage_bits() {
        let usage = BufferUsage::CPU_READ | BufferUsage::MEM_DMA;
        assert!(usage.contains(BufferUsage::MEM_DMA));
        assert!(!usage.contains(BufferUsage::HW_RENDER));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(LifecycleState::EosReached.to_string(), "EOS_REACHED");
        assert!(LifecycleState::Flushed.is_streaming());
        assert!(!LifecycleState::Stopped.is_streaming());
    }
}
