//! Configuration types for GhostProc

use crate::error::{Error, Result};
use crate::processing::{ColorSpaceInfo, HdrMetadataType, TransformKind};
use crate::types::PixelFormat;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Names the input surface and the worker thread
    pub name: String,
    /// Output buffers requested up front, also the output surface queue depth
    pub output_buffer_count: u32,
    /// How long a buffer request may block (0 = fail immediately)
    pub request_timeout_ms: u64,
    /// Row alignment of requested buffers in bytes
    pub stride_alignment: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "ghostproc".to_string(),
            output_buffer_count: 5,
            request_timeout_ms: 0,
            stride_alignment: 8,
        }
    }
}

impl EngineConfig {
    pub const MAX_OUTPUT_BUFFERS: u32 = 64;

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_output_buffer_count(mut self, count: u32) -> Self {
        self.output_buffer_count = count;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_buffer_count == 0 || self.output_buffer_count > Self::MAX_OUTPUT_BUFFERS {
            return Err(Error::Config(format!(
                "output_buffer_count must be in 1..={}, got {}",
                Self::MAX_OUTPUT_BUFFERS,
                self.output_buffer_count
            )));
        }
        if !self.stride_alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "stride_alignment must be a power of two, got {}",
                self.stride_alignment
            )));
        }
        Ok(())
    }
}

/// Rendering intent for gamut mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderIntent {
    #[default]
    Perceptual,
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

/// Colorspace conversion parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorSpaceConfig {
    /// Output pixel format
    pub pixel_format: PixelFormat,
    /// Output color space
    pub color_space: ColorSpaceInfo,
    /// HDR metadata type tagged on outputs
    pub hdr_metadata_type: HdrMetadataType,
    pub render_intent: RenderIntent,
    /// SDR UI brightness relative to reference white
    pub sdr_ui_brightness_ratio: f32,
}

impl Default for ColorSpaceConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgba8888,
            color_space: ColorSpaceInfo::srgb(),
            hdr_metadata_type: HdrMetadataType::None,
            render_intent: RenderIntent::Perceptual,
            sdr_ui_brightness_ratio: 1.0,
        }
    }
}

impl ColorSpaceConfig {
    /// Output formats the converter can produce
    pub const OUTPUT_FORMATS: [PixelFormat; 4] = [
        PixelFormat::Rgba8888,
        PixelFormat::Bgra8888,
        PixelFormat::Rgba1010102,
        PixelFormat::Nv12,
    ];
}

/// Metadata generation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetadataAlgorithm {
    /// Static metadata only
    Image,
    /// Static metadata plus a per-frame luminance histogram
    #[default]
    Video,
}

/// Metadata generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub algorithm: MetadataAlgorithm,
}

/// Detail enhancement quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityLevel {
    None,
    #[default]
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// Sharpen strength applied by the detail enhancer
    pub fn sharpen_strength(&self) -> f32 {
        match self {
            QualityLevel::None | QualityLevel::Low => 0.0,
            QualityLevel::Medium => 0.5,
            QualityLevel::High => 1.0,
        }
    }
}

/// Detail enhancement parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailConfig {
    pub level: QualityLevel,
}

/// Kind-specific transform configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransformConfig {
    ColorSpace(ColorSpaceConfig),
    Metadata(MetadataConfig),
    Detail(DetailConfig),
}

impl TransformConfig {
    /// Default parameter set for `kind`
    pub fn default_for(kind: TransformKind) -> Self {
        match kind {
            TransformKind::ColorSpaceConvert => TransformConfig::ColorSpace(Default::default()),
            TransformKind::GenerateMetadata => TransformConfig::Metadata(Default::default()),
            TransformKind::EnhanceDetail => TransformConfig::Detail(Default::default()),
        }
    }

    pub fn kind(&self) -> TransformKind {
        match self {
            TransformConfig::ColorSpace(_) => TransformKind::ColorSpaceConvert,
            TransformConfig::Metadata(_) => TransformKind::GenerateMetadata,
            TransformConfig::Detail(_) => TransformKind::EnhanceDetail,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let TransformConfig::ColorSpace(csc) = self {
            let ratio = csc.sdr_ui_brightness_ratio;
            if !ratio.is_finite() || ratio <= 0.0 || ratio > 10.0 {
                return Err(Error::InvalidValue(format!(
                    "sdr_ui_brightness_ratio must be in (0, 10], got {}",
                    ratio
                )));
            }
            if !ColorSpaceConfig::OUTPUT_FORMATS.contains(&csc.pixel_format) {
                return Err(Error::InvalidValue(format!(
                    "Unsupported output pixel format: {:?}",
                    csc.pixel_format
                )));
            }
        }
        Ok(())
    }

    /// Output buffer format forced by the configuration, if any
    pub fn output_pixel_format(&self) -> Option<PixelFormat> {
        match self {
            TransformConfig::ColorSpace(csc) => Some(csc.pixel_format),
            _ => None,
        }
    }

    /// Color tags forced onto outputs, if any (otherwise the input's are copied)
    pub fn output_color(&self) -> Option<(ColorSpaceInfo, HdrMetadataType)> {
        match self {
            TransformConfig::ColorSpace(csc) => Some((csc.color_space, csc.hdr_metadata_type)),
            _ => None,
        }
    }
}
