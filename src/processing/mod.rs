//! Per-frame transform backends
//!
//! The engine drives one [`TransformBackend`] per instance:
//! - Colorspace conversion (with HDR to SDR tonemapping)
//! - HDR metadata generation
//! - Detail enhancement

mod convert;
mod detail;
pub mod hdr;
mod metadata;

pub use convert::ColorSpaceConverter;
pub use detail::DetailEnhancer;
pub use hdr::{
    ColorMatrix, ColorPrimaries, ColorRange, ColorSpaceInfo, ContentLightLevel, Hdr10Metadata,
    HdrMetadataType, TransferFunction,
};
pub use metadata::MetadataGenerator;

use crate::buffer::NativeBuffer;
use crate::config::TransformConfig;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Which transform an engine instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformKind {
    /// Color-space conversion (optionally HDR to SDR)
    ColorSpaceConvert,
    /// HDR metadata generation
    GenerateMetadata,
    /// Detail enhancement
    EnhanceDetail,
}

impl TransformKind {
    pub const ALL: [TransformKind; 3] = [
        TransformKind::ColorSpaceConvert,
        TransformKind::GenerateMetadata,
        TransformKind::EnhanceDetail,
    ];

    /// Get human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            TransformKind::ColorSpaceConvert => "Colorspace conversion",
            TransformKind::GenerateMetadata => "HDR metadata generation",
            TransformKind::EnhanceDetail => "Detail enhancement",
        }
    }

    /// Short name used for thread and surface names
    pub fn short_name(&self) -> &'static str {
        match self {
            TransformKind::ColorSpaceConvert => "csc",
            TransformKind::GenerateMetadata => "metagen",
            TransformKind::EnhanceDetail => "detail",
        }
    }
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Trait for per-frame transforms.
///
/// Every `process` error is a per-frame failure; the engine drops the frame
/// and keeps running.
pub trait TransformBackend: Send {
    fn kind(&self) -> TransformKind;

    /// Apply a kind-specific parameter set
    fn set_parameter(&mut self, config: &TransformConfig) -> Result<()>;

    /// Current parameter set
    fn parameter(&self) -> Result<TransformConfig>;

    /// Transform `input` into `output` (both already have the same geometry)
    fn process(&mut self, input: &NativeBuffer, output: &NativeBuffer) -> Result<()>;
}

/// Creates backends, at `init` and again on every `reset`
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: TransformKind) -> Result<Box<dyn TransformBackend>>;
}

/// Factory for the built-in CPU backends
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinBackends;

impl BackendFactory for BuiltinBackends {
    fn create(&self, kind: TransformKind) -> Result<Box<dyn TransformBackend>> {
        create_backend(kind)
    }
}

/// Create the built-in backend for `kind`
pub fn create_backend(kind: TransformKind) -> Result<Box<dyn TransformBackend>> {
    tracing::debug!("Creating {} backend", kind);
    Ok(match kind {
        TransformKind::ColorSpaceConvert => Box::new(ColorSpaceConverter::new()),
        TransformKind::GenerateMetadata => Box::new(MetadataGenerator::new()),
        TransformKind::EnhanceDetail => Box::new(DetailEnhancer::new()),
    })
}

/// Reject a parameter set meant for another kind
pub(crate) fn expect_kind(config: &TransformConfig, kind: TransformKind) -> Result<()> {
    if config.kind() == kind {
        Ok(())
    } else {
        Err(Error::InvalidValue(format!(
            "{} parameters given to a {} backend",
            config.kind(),
            kind
        )))
    }
}

/// Copy the visible rows of `src` into `dst` (same geometry, formats with equal row size)
pub(crate) fn copy_rows(src: &crate::buffer::BufferData, dst: &mut crate::buffer::BufferData) -> Result<()> {
    if src.resolution != dst.resolution || src.row_bytes() != dst.row_bytes() {
        return Err(Error::Backend(format!(
            "Geometry mismatch: {} {:?} -> {} {:?}",
            src.resolution, src.format, dst.resolution, dst.format
        )));
    }
    let rows = src.format.storage_rows(src.resolution.height);
    for y in 0..rows {
        dst.row_mut(y).copy_from_slice(src.row(y));
    }
    Ok(())
}
