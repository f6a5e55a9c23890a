//! Colorspace conversion backend

use super::hdr::{code_to_nits, tonemap_reinhard, TransferFunction, SDR_REFERENCE_WHITE};
use super::{copy_rows, expect_kind, TransformBackend, TransformKind};
use crate::buffer::{BufferData, NativeBuffer};
use crate::config::{ColorSpaceConfig, TransformConfig};
use crate::error::{Error, Result};
use crate::types::PixelFormat;

/// Colorspace converter
///
/// Handles same-format copies, RGBA <-> BGRA swaps and 10-bit HDR to 8-bit
/// SDR tonemapping. The engine tags the output with the configured color
/// space before this runs.
#[derive(Debug, Default)]
pub struct ColorSpaceConverter {
    config: Option<ColorSpaceConfig>,
}

impl ColorSpaceConverter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformBackend for ColorSpaceConverter {
    fn kind(&self) -> TransformKind {
        TransformKind::ColorSpaceConvert
    }

    fn set_parameter(&mut self, config: &TransformConfig) -> Result<()> {
        expect_kind(config, self.kind())?;
        config.validate()?;
        if let TransformConfig::ColorSpace(csc) = config {
            self.config = Some(*csc);
        }
        Ok(())
    }

    fn parameter(&self) -> Result<TransformConfig> {
        self.config
            .map(TransformConfig::ColorSpace)
            .ok_or_else(|| Error::InvalidOperation("Colorspace converter not configured".into()))
    }

    fn process(&mut self, input: &NativeBuffer, output: &NativeBuffer) -> Result<()> {
        let config = self
            .config
            .ok_or_else(|| Error::Backend("Colorspace converter not configured".into()))?;
        let source_transfer = input
            .metadata()
            .color_space
            .map(|cs| cs.transfer)
            .unwrap_or_default();

        let src = input.lock();
        let mut dst = output.lock();
        if src.resolution != dst.resolution {
            return Err(Error::Backend(format!(
                "Geometry mismatch: {} -> {}",
                src.resolution, dst.resolution
            )));
        }

        match (src.format, dst.format) {
            (a, b) if a == b => copy_rows(&src, &mut dst),
            (PixelFormat::Rgba8888, PixelFormat::Bgra8888)
            | (PixelFormat::Bgra8888, PixelFormat::Rgba8888) => {
                bgra_rgba_swap(&src, &mut dst);
                Ok(())
            }
            (PixelFormat::Rgba1010102, PixelFormat::Rgba8888 | PixelFormat::Bgra8888) => {
                rgb10_to_rgb8(
                    &src,
                    &mut dst,
                    source_transfer,
                    config.sdr_ui_brightness_ratio,
                );
                Ok(())
            }
            (from, to) => Err(Error::Backend(format!(
                "Unsupported conversion: {:?} -> {:?}",
                from, to
            ))),
        }
    }
}

/// BGRA <-> RGBA swap (just swap R and B channels)
fn bgra_rgba_swap(src: &BufferData, dst: &mut BufferData) {
    for y in 0..src.resolution.height {
        let out = dst.row_mut(y);
        out.copy_from_slice(src.row(y));
        for chunk in out.chunks_exact_mut(4) {
            chunk.swap(0, 2);
        }
    }
}

/// Unpack RGBA_1010102 (R in the low bits) into normalized channels
fn unpack_1010102(pixel: u32) -> [f32; 4] {
    [
        (pixel & 0x3FF) as f32 / 1023.0,
        ((pixel >> 10) & 0x3FF) as f32 / 1023.0,
        ((pixel >> 20) & 0x3FF) as f32 / 1023.0,
        (pixel >> 30) as f32 / 3.0,
    ]
}

/// 10-bit to 8-bit, tonemapping HDR transfers down to SDR
fn rgb10_to_rgb8(
    src: &BufferData,
    dst: &mut BufferData,
    transfer: TransferFunction,
    brightness_ratio: f32,
) {
    let bgr = dst.format == PixelFormat::Bgra8888;
    for y in 0..src.resolution.height {
        let input = src.row(y);
        let output = dst.row_mut(y);
        for (px_in, px_out) in input.chunks_exact(4).zip(output.chunks_exact_mut(4)) {
            let pixel = u32::from_le_bytes([px_in[0], px_in[1], px_in[2], px_in[3]]);
            let [r, g, b, a] = unpack_1010102(pixel);

            let map = |code: f32| -> u8 {
                let sdr = if transfer.is_hdr() {
                    let nits = code_to_nits(code, transfer);
                    let mapped = tonemap_reinhard(nits, SDR_REFERENCE_WHITE) * brightness_ratio;
                    mapped.clamp(0.0, 1.0).powf(1.0 / 2.2)
                } else {
                    (code * brightness_ratio).clamp(0.0, 1.0)
                };
                (sdr * 255.0).round() as u8
            };

            let (r8, g8, b8) = (map(r), map(g), map(b));
            let a8 = (a * 255.0).round() as u8;
            if bgr {
                px_out.copy_from_slice(&[b8, g8, r8, a8]);
            } else {
                px_out.copy_from_slice(&[r8, g8, b8, a8]);
            }
        }
    }
}
