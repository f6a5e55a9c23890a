//! HDR (High Dynamic Range) and color-space tags
//!
//! Provides:
//! - Color-space description (primaries, transfer, matrix, range)
//! - HDR10 static metadata and content light level
//! - PQ transfer functions and tonemapping used by the reference backends

use serde::{Deserialize, Serialize};

/// HDR transfer function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferFunction {
    /// SDR (BT.709 gamma)
    #[default]
    Sdr,
    /// sRGB (IEC 61966-2-1)
    Srgb,
    /// PQ (Perceptual Quantizer) - HDR10, Dolby Vision
    Pq,
    /// HLG (Hybrid Log-Gamma) - BBC/NHK
    Hlg,
}

impl TransferFunction {
    pub fn is_hdr(&self) -> bool {
        matches!(self, TransferFunction::Pq | TransferFunction::Hlg)
    }
}

/// Color primaries (color gamut)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorPrimaries {
    /// BT.709 (SDR, HD)
    #[default]
    Bt709,
    /// BT.2020 (HDR, UHD)
    Bt2020,
    /// DCI-P3 (Cinema)
    DciP3,
    /// Display P3 (D65 white point)
    DisplayP3,
}

/// Color matrix coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorMatrix {
    /// BT.601
    Bt601,
    /// BT.709
    #[default]
    Bt709,
    /// BT.2020 NCL (Non-Constant Luminance)
    Bt2020Ncl,
    /// BT.2020 CL (Constant Luminance)
    Bt2020Cl,
}

/// Quantization range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorRange {
    /// Studio swing (16-235 for 8-bit)
    #[default]
    Limited,
    /// Full swing (0-255 for 8-bit)
    Full,
}

/// Complete color-space tag carried on a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ColorSpaceInfo {
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
    pub matrix: ColorMatrix,
    pub range: ColorRange,
}

impl ColorSpaceInfo {
    /// BT.709 limited range SDR video
    pub const fn bt709() -> Self {
        Self {
            primaries: ColorPrimaries::Bt709,
            transfer: TransferFunction::Sdr,
            matrix: ColorMatrix::Bt709,
            range: ColorRange::Limited,
        }
    }

    /// Full-range sRGB
    pub const fn srgb() -> Self {
        Self {
            primaries: ColorPrimaries::Bt709,
            transfer: TransferFunction::Srgb,
            matrix: ColorMatrix::Bt709,
            range: ColorRange::Full,
        }
    }

    /// HDR10 (BT.2020 PQ)
    pub const fn bt2020_pq() -> Self {
        Self {
            primaries: ColorPrimaries::Bt2020,
            transfer: TransferFunction::Pq,
            matrix: ColorMatrix::Bt2020Ncl,
            range: ColorRange::Limited,
        }
    }

    /// BT.2020 HLG
    pub const fn bt2020_hlg() -> Self {
        Self {
            primaries: ColorPrimaries::Bt2020,
            transfer: TransferFunction::Hlg,
            matrix: ColorMatrix::Bt2020Ncl,
            range: ColorRange::Limited,
        }
    }

    pub fn is_hdr(&self) -> bool {
        self.transfer.is_hdr()
    }
}

/// Kind of HDR metadata attached to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HdrMetadataType {
    /// SDR, no HDR metadata
    #[default]
    None,
    /// Static metadata only (HDR10, SMPTE ST 2086 + CTA-861.3)
    Static,
    /// Per-frame dynamic metadata
    Dynamic,
}

/// HDR10 static metadata (SMPTE ST 2086)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hdr10Metadata {
    pub red_primary_x: f32,
    pub red_primary_y: f32,
    pub green_primary_x: f32,
    pub green_primary_y: f32,
    pub blue_primary_x: f32,
    pub blue_primary_y: f32,
    pub white_point_x: f32,
    pub white_point_y: f32,
    /// Max luminance in nits (cd/m²)
    pub max_luminance: f32,
    /// Min luminance in nits (cd/m²)
    pub min_luminance: f32,
}

impl Hdr10Metadata {
    /// Create metadata for standard BT.2020 display
    pub fn bt2020_default() -> Self {
        Self {
            // BT.2020 primaries
            red_primary_x: 0.708,
            red_primary_y: 0.292,
            green_primary_x: 0.170,
            green_primary_y: 0.797,
            blue_primary_x: 0.131,
            blue_primary_y: 0.046,
            // D65 white point
            white_point_x: 0.3127,
            white_point_y: 0.3290,
            max_luminance: 1000.0,
            min_luminance: 0.001,
        }
    }

    /// Create metadata for specific max luminance
    pub fn with_max_luminance(max_nits: f32) -> Self {
        let mut meta = Self::bt2020_default();
        meta.max_luminance = max_nits;
        meta
    }
}

/// Content Light Level Info (MaxCLL, MaxFALL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    /// Maximum Content Light Level (nits)
    pub max_cll: u16,
    /// Maximum Frame Average Light Level (nits)
    pub max_fall: u16,
}

impl ContentLightLevel {
    pub fn new(max_cll: u16, max_fall: u16) -> Self {
        Self { max_cll, max_fall }
    }
}

/// Reference white for SDR content, in nits
pub const SDR_REFERENCE_WHITE: f32 = 100.0;

/// Apply PQ (SMPTE ST 2084) transfer function
/// Converts linear light (nits) to PQ encoded value
pub fn linear_to_pq(linear: f32) -> f32 {
    const M1: f32 = 0.1593017578125; // 2610/16384
    const M2: f32 = 78.84375; // 2523/32 * 128
    const C1: f32 = 0.8359375; // 3424/4096
    const C2: f32 = 18.8515625; // 2413/128
    const C3: f32 = 18.6875; // 2392/128

    let y = (linear / 10000.0).max(0.0);
    let y_m1 = y.powf(M1);
    ((C1 + C2 * y_m1) / (1.0 + C3 * y_m1)).powf(M2)
}

/// Apply inverse PQ transfer function
/// Converts PQ encoded value to linear light (nits)
pub fn pq_to_linear(pq: f32) -> f32 {
    const M1: f32 = 0.1593017578125;
    const M2: f32 = 78.84375;
    const C1: f32 = 0.8359375;
    const C2: f32 = 18.8515625;
    const C3: f32 = 18.6875;

    let e_inv_m2 = pq.clamp(0.0, 1.0).powf(1.0 / M2);
    let num = (e_inv_m2 - C1).max(0.0);
    let den = C2 - C3 * e_inv_m2;
    10000.0 * (num / den).powf(1.0 / M1)
}

/// Simple HDR to SDR tonemapping (Reinhard)
pub fn tonemap_reinhard(hdr_linear: f32, max_luminance: f32) -> f32 {
    let scaled = hdr_linear / max_luminance;
    scaled / (1.0 + scaled)
}

/// Luminance in nits of a normalized code value under `transfer`
pub fn code_to_nits(code: f32, transfer: TransferFunction) -> f32 {
    match transfer {
        TransferFunction::Pq => pq_to_linear(code),
        // HLG nominal peak of 1000 nits, OOTF ignored
        TransferFunction::Hlg => code.clamp(0.0, 1.0) * 1000.0,
        TransferFunction::Sdr | TransferFunction::Srgb => {
            code.clamp(0.0, 1.0).powf(2.2) * SDR_REFERENCE_WHITE
        }
    }
}
