//! Detail enhancement backend

use super::{copy_rows, expect_kind, TransformBackend, TransformKind};
use crate::buffer::{BufferData, NativeBuffer};
use crate::config::{DetailConfig, QualityLevel, TransformConfig};
use crate::error::{Error, Result};
use crate::types::PixelFormat;

/// Detail enhancer
pub struct DetailEnhancer {
    config: Option<DetailConfig>,
}

impl DetailEnhancer {
    pub fn new() -> Self {
        Self { config: None }
    }
}

impl Default for DetailEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformBackend for DetailEnhancer {
    fn kind(&self) -> TransformKind {
        TransformKind::EnhanceDetail
    }

    fn set_parameter(&mut self, config: &TransformConfig) -> Result<()> {
        expect_kind(config, self.kind())?;
        if let TransformConfig::Detail(detail) = config {
            self.config = Some(*detail);
        }
        Ok(())
    }

    fn parameter(&self) -> Result<TransformConfig> {
        self.config
            .map(TransformConfig::Detail)
            .ok_or_else(|| Error::InvalidOperation("Detail enhancer not configured".into()))
    }

    fn process(&mut self, input: &NativeBuffer, output: &NativeBuffer) -> Result<()> {
        let level = self
            .config
            .map(|c| c.level)
            .ok_or_else(|| Error::Backend("Detail enhancer not configured".into()))?;

        let src = input.lock();
        let mut dst = output.lock();
        copy_rows(&src, &mut dst)?;

        let strength = level.sharpen_strength();
        if strength > 0.0 && matches!(src.format, PixelFormat::Rgba8888 | PixelFormat::Bgra8888) {
            sharpen_frame(&src, &mut dst, strength);
        }
        Ok(())
    }
}

/// 3x3 unsharp kernel on the color channels of a packed 8-bit frame.
///
/// Edge pixels and alpha are left as copied.
pub fn sharpen_frame(src: &BufferData, dst: &mut BufferData, strength: f32) {
    let width = src.resolution.width as usize;
    let height = src.resolution.height;
    if width < 3 || height < 3 {
        return;
    }
    let bpp = 4;

    for y in 1..height - 1 {
        let above = src.row(y - 1);
        let center = src.row(y);
        let below = src.row(y + 1);
        let out = dst.row_mut(y);

        for x in 1..width - 1 {
            for c in 0..3 {
                let idx = x * bpp + c;
                let neighbors = above[idx] as f32
                    + below[idx] as f32
                    + center[idx - bpp] as f32
                    + center[idx + bpp] as f32;
                let value = center[idx] as f32;
                let sharpened = value + strength * (4.0 * value - neighbors);
                out[idx] = sharpened.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

impl std::fmt::Debug for DetailEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetailEnhancer")
            .field(
                "level",
                &self.config.map(|c| c.level).unwrap_or(QualityLevel::None),
            )
            .finish()
    }
}
