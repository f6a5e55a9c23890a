//! HDR metadata generation backend

use super::hdr::{code_to_nits, ContentLightLevel, Hdr10Metadata, HdrMetadataType, TransferFunction};
use super::{copy_rows, expect_kind, TransformBackend, TransformKind};
use crate::buffer::{BufferData, NativeBuffer};
use crate::config::{MetadataAlgorithm, MetadataConfig, TransformConfig};
use crate::error::{Error, Result};
use crate::types::PixelFormat;

/// Bins in the per-frame luminance histogram
pub const HISTOGRAM_BINS: usize = 16;

/// Upper bound of the histogram range, in nits
const HISTOGRAM_PEAK_NITS: f32 = 10000.0;

/// Luminance statistics of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLuminance {
    /// Brightest pixel, in nits
    pub max_nits: f32,
    /// Frame average, in nits
    pub average_nits: f32,
    pub histogram: [u32; HISTOGRAM_BINS],
}

impl FrameLuminance {
    /// Histogram serialized as little-endian u32 counts
    pub fn histogram_bytes(&self) -> Vec<u8> {
        self.histogram.iter().flat_map(|c| c.to_le_bytes()).collect()
    }
}

/// HDR metadata generator
///
/// Passes pixels through unchanged and tags the output with MaxCLL/MaxFALL
/// and mastering display metadata measured from the frame.
#[derive(Debug, Default)]
pub struct MetadataGenerator {
    config: Option<MetadataConfig>,
}

impl MetadataGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformBackend for MetadataGenerator {
    fn kind(&self) -> TransformKind {
        TransformKind::GenerateMetadata
    }

    fn set_parameter(&mut self, config: &TransformConfig) -> Result<()> {
        expect_kind(config, self.kind())?;
        if let TransformConfig::Metadata(meta) = config {
            self.config = Some(*meta);
        }
        Ok(())
    }

    fn parameter(&self) -> Result<TransformConfig> {
        self.config
            .map(TransformConfig::Metadata)
            .ok_or_else(|| Error::InvalidOperation("Metadata generator not configured".into()))
    }

    fn process(&mut self, input: &NativeBuffer, output: &NativeBuffer) -> Result<()> {
        let config = self
            .config
            .ok_or_else(|| Error::Backend("Metadata generator not configured".into()))?;
        let transfer = input
            .metadata()
            .color_space
            .map(|cs| cs.transfer)
            .unwrap_or_default();

        let luminance = {
            let src = input.lock();
            let mut dst = output.lock();
            copy_rows(&src, &mut dst)?;
            measure(&src, transfer)
        };

        let max_cll = luminance.max_nits.round().min(u16::MAX as f32) as u16;
        let max_fall = luminance.average_nits.round().min(u16::MAX as f32) as u16;
        tracing::trace!(
            "Frame luminance: MaxCLL={} MaxFALL={} ({:?})",
            max_cll,
            max_fall,
            config.algorithm
        );

        output.update_metadata(|meta| {
            meta.hdr_static = Some(Hdr10Metadata::with_max_luminance(luminance.max_nits.max(1.0)));
            meta.content_light = Some(ContentLightLevel::new(max_cll, max_fall));
            match config.algorithm {
                MetadataAlgorithm::Image => {
                    meta.hdr_type = HdrMetadataType::Static;
                    meta.hdr_dynamic = None;
                }
                MetadataAlgorithm::Video => {
                    meta.hdr_type = HdrMetadataType::Dynamic;
                    meta.hdr_dynamic = Some(luminance.histogram_bytes());
                }
            }
        });
        Ok(())
    }
}

/// Measure per-pixel luminance of a frame.
///
/// Packed RGB uses the brightest channel, YUV formats the luma plane.
pub fn measure(data: &BufferData, transfer: TransferFunction) -> FrameLuminance {
    let mut histogram = [0u32; HISTOGRAM_BINS];
    let mut max_nits = 0.0f32;
    let mut sum = 0.0f64;
    let mut count = 0u64;

    for y in 0..data.resolution.height {
        let row = data.row(y);
        let codes: Box<dyn Iterator<Item = f32> + '_> = match data.format {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => Box::new(
                row.chunks_exact(4)
                    .map(|px| px[0].max(px[1]).max(px[2]) as f32 / 255.0),
            ),
            PixelFormat::Rgba1010102 => Box::new(row.chunks_exact(4).map(|px| {
                let p = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                let r = p & 0x3FF;
                let g = (p >> 10) & 0x3FF;
                let b = (p >> 20) & 0x3FF;
                r.max(g).max(b) as f32 / 1023.0
            })),
            PixelFormat::Nv12 | PixelFormat::Nv21 | PixelFormat::Yuv420p => {
                Box::new(row.iter().map(|&luma| luma as f32 / 255.0))
            }
            // P010 keeps the 10 significant bits in the high end of each sample
            PixelFormat::YcbcrP010 | PixelFormat::YcrcbP010 => Box::new(
                row.chunks_exact(2)
                    .map(|s| (u16::from_le_bytes([s[0], s[1]]) >> 6) as f32 / 1023.0),
            ),
        };

        for code in codes {
            let nits = code_to_nits(code, transfer);
            max_nits = max_nits.max(nits);
            sum += nits as f64;
            count += 1;
            let bin = ((nits / HISTOGRAM_PEAK_NITS) * HISTOGRAM_BINS as f32) as usize;
            histogram[bin.min(HISTOGRAM_BINS - 1)] += 1;
        }
    }

    FrameLuminance {
        max_nits,
        average_nits: if count == 0 { 0.0 } else { (sum / count as f64) as f32 },
        histogram,
    }
}
