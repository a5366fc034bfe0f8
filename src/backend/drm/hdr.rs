use tracing::{debug, warn};

use super::{access_error, Error, KmsDevice};
use crate::backend::color::{ColorSpace, TransferCharacteristics};

/// Size of the kernel's `struct hdr_output_metadata`
pub const HDR_OUTPUT_METADATA_SIZE: usize = 32;

const STATIC_METADATA_TYPE1: u8 = 0;

const EOTF_TRADITIONAL_SDR: u8 = 0;
const EOTF_TRADITIONAL_HDR: u8 = 1;
const EOTF_SMPTE_2084: u8 = 2;
const EOTF_HLG: u8 = 3;

fn clamp16(value: f32) -> u16 {
    value.round().clamp(0.0, 65535.0) as u16
}

/// The `HDR_OUTPUT_METADATA` connector blob: a CTA-861-G static metadata infoframe
///
/// Layout (little-endian): `u32` metadata type, then the infoframe with `u8` EOTF, `u8`
/// descriptor type, three display primaries and the white point as `u16` x/y pairs in
/// 0.00002 steps, maximum mastering luminance in cd/m², minimum mastering luminance in
/// 0.0001 cd/m², MaxCLL and MaxFALL in cd/m², zero padded to 32 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrOutputMetadata {
    /// EOTF code
    pub eotf: u8,
    /// Display primaries, red, green, blue, as (x, y)
    pub display_primaries: [(u16, u16); 3],
    /// White point (x, y)
    pub white_point: (u16, u16),
    /// Maximum mastering luminance
    pub max_display_mastering_luminance: u16,
    /// Minimum mastering luminance
    pub min_display_mastering_luminance: u16,
    /// Maximum content light level
    pub max_cll: u16,
    /// Maximum frame average light level
    pub max_fall: u16,
}

impl HdrOutputMetadata {
    /// Describes `csp`. Colorspaces without an HDR transfer only carry the SDR EOTF.
    pub fn from_colorspace(csp: &ColorSpace) -> HdrOutputMetadata {
        let eotf = match csp.transfer {
            TransferCharacteristics::Bt1886 => EOTF_TRADITIONAL_HDR,
            TransferCharacteristics::Pq => EOTF_SMPTE_2084,
            TransferCharacteristics::Hlg => EOTF_HLG,
            _ => EOTF_TRADITIONAL_SDR,
        };
        let mut metadata = HdrOutputMetadata {
            eotf,
            ..Default::default()
        };
        if eotf == EOTF_TRADITIONAL_SDR {
            return metadata;
        }

        // 0x0000..=0xC350 maps to 0.0..=1.0
        let chroma = |value: f32| clamp16(value * 50000.0);
        let colors = csp.primaries.coordinates();
        metadata.display_primaries = [colors.red, colors.green, colors.blue].map(|c| (chroma(c.x), chroma(c.y)));
        metadata.white_point = (chroma(colors.white.x), chroma(colors.white.y));

        metadata.min_display_mastering_luminance = clamp16(csp.hdr.min_luma * 10000.0);
        metadata.max_display_mastering_luminance = clamp16(csp.hdr.max_luma);
        metadata.max_cll = clamp16(csp.hdr.max_cll);
        metadata.max_fall = clamp16(csp.hdr.max_fall);
        metadata
    }

    /// Serializes the kernel struct
    pub fn to_bytes(&self) -> [u8; HDR_OUTPUT_METADATA_SIZE] {
        let mut out = [0u8; HDR_OUTPUT_METADATA_SIZE];
        out[0..4].copy_from_slice(&(STATIC_METADATA_TYPE1 as u32).to_le_bytes());
        out[4] = self.eotf;
        out[5] = STATIC_METADATA_TYPE1;
        let fields = self
            .display_primaries
            .iter()
            .chain(std::iter::once(&self.white_point))
            .flat_map(|&(x, y)| [x, y])
            .chain([
                self.max_display_mastering_luminance,
                self.min_display_mastering_luminance,
                self.max_cll,
                self.max_fall,
            ]);
        for (chunk, value) in out[6..30].chunks_exact_mut(2).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// The kernel blob carrying the HDR metadata of the current colorspace
#[derive(Debug, Default)]
pub struct HdrBlob {
    blob_id: u32,
    current: Option<ColorSpace>,
}

impl HdrBlob {
    /// Creates a new blob for `csp`, unless it matches the colorspace of the current blob
    ///
    /// Returns the id of the blob describing `csp`.
    pub fn update<D: KmsDevice + ?Sized>(&mut self, dev: &D, csp: &ColorSpace) -> Result<u32, Error> {
        if self.blob_id != 0 && self.current.as_ref() == Some(csp) {
            return Ok(self.blob_id);
        }
        self.destroy(dev);

        let metadata = HdrOutputMetadata::from_colorspace(csp);
        debug!(?metadata, "Creating HDR output metadata");
        self.blob_id = dev
            .create_blob(&metadata.to_bytes())
            .map_err(access_error(dev, "Failed to create HDR metadata blob"))?;
        self.current = Some(*csp);
        Ok(self.blob_id)
    }

    /// Id of the current blob, zero if none
    pub fn id(&self) -> u32 {
        self.blob_id
    }

    /// Destroys the current blob
    pub fn destroy<D: KmsDevice + ?Sized>(&mut self, dev: &D) {
        if self.blob_id != 0 {
            if let Err(err) = dev.destroy_blob(self.blob_id) {
                warn!("Failed to destroy HDR metadata blob: {}", err);
            }
            self.blob_id = 0;
        }
        self.current = None;
    }
}
