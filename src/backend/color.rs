//! Colorspace description of video frames
//!
//! Plain data consumed by the HDR metadata blob of the drm backend.

/// CIE 1931 xy chromaticity coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Chromaticity {
    /// x
    pub x: f32,
    /// y
    pub y: f32,
}

const fn xy(x: f32, y: f32) -> Chromaticity {
    Chromaticity { x, y }
}

/// Red, green and blue primaries plus white point of a colorspace
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrimaryCoordinates {
    /// Red primary
    pub red: Chromaticity,
    /// Green primary
    pub green: Chromaticity,
    /// Blue primary
    pub blue: Chromaticity,
    /// White point
    pub white: Chromaticity,
}

const WHITE_C: Chromaticity = xy(0.310, 0.316);
const WHITE_D50: Chromaticity = xy(0.34577, 0.35850);
const WHITE_D65: Chromaticity = xy(0.3127, 0.3290);
const WHITE_DCI: Chromaticity = xy(0.314, 0.351);
const WHITE_E: Chromaticity = xy(1.0 / 3.0, 1.0 / 3.0);
const WHITE_ACES: Chromaticity = xy(0.32168, 0.33767);

/// Color primaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Primaries {
    /// Unknown, treated as BT.709
    #[default]
    Auto,
    /// ITU-R BT.601, 525 lines (NTSC, SMPTE-C)
    Bt601_525,
    /// ITU-R BT.601, 625 lines (PAL, SECAM)
    Bt601_625,
    /// ITU-R BT.709, also sRGB
    Bt709,
    /// ITU-R BT.470 M
    Bt470M,
    /// ITU-R BT.2020
    Bt2020,
    /// Apple RGB
    Apple,
    /// Adobe RGB (1998)
    Adobe,
    /// ProPhoto RGB (ROMM)
    ProPhoto,
    /// CIE 1931 RGB
    Cie1931,
    /// DCI-P3 with DCI white point
    DciP3,
    /// DCI-P3 with D65 white point
    DisplayP3,
    /// Panasonic V-Gamut
    VGamut,
    /// Sony S-Gamut
    SGamut,
    /// EBU Tech. 3213-E
    Ebu3213,
    /// Traditional film primaries with illuminant C
    FilmC,
    /// ACES primaries #0
    AcesAp0,
    /// ACES primaries #1
    AcesAp1,
}

impl Primaries {
    /// Chromaticity coordinates of the primaries
    pub fn coordinates(self) -> PrimaryCoordinates {
        let (red, green, blue, white) = match self {
            Primaries::Bt470M => (xy(0.670, 0.330), xy(0.210, 0.710), xy(0.140, 0.080), WHITE_C),
            Primaries::Bt601_525 => (xy(0.630, 0.340), xy(0.310, 0.595), xy(0.155, 0.070), WHITE_D65),
            Primaries::Bt601_625 => (xy(0.640, 0.330), xy(0.290, 0.600), xy(0.150, 0.060), WHITE_D65),
            Primaries::Auto | Primaries::Bt709 => {
                (xy(0.640, 0.330), xy(0.300, 0.600), xy(0.150, 0.060), WHITE_D65)
            }
            Primaries::Bt2020 => (xy(0.708, 0.292), xy(0.170, 0.797), xy(0.131, 0.046), WHITE_D65),
            Primaries::Apple => (xy(0.625, 0.340), xy(0.280, 0.595), xy(0.115, 0.070), WHITE_D65),
            Primaries::Adobe => (xy(0.640, 0.330), xy(0.210, 0.710), xy(0.150, 0.060), WHITE_D65),
            Primaries::ProPhoto => (
                xy(0.7347, 0.2653),
                xy(0.1596, 0.8404),
                xy(0.0366, 0.0001),
                WHITE_D50,
            ),
            Primaries::Cie1931 => (
                xy(0.7347, 0.2653),
                xy(0.2738, 0.7174),
                xy(0.1666, 0.0089),
                WHITE_E,
            ),
            Primaries::DciP3 => (xy(0.680, 0.320), xy(0.265, 0.690), xy(0.150, 0.060), WHITE_DCI),
            Primaries::DisplayP3 => (xy(0.680, 0.320), xy(0.265, 0.690), xy(0.150, 0.060), WHITE_D65),
            Primaries::VGamut => (xy(0.730, 0.280), xy(0.165, 0.840), xy(0.100, -0.030), WHITE_D65),
            Primaries::SGamut => (xy(0.730, 0.280), xy(0.140, 0.855), xy(0.100, -0.050), WHITE_D65),
            Primaries::Ebu3213 => (xy(0.630, 0.340), xy(0.310, 0.595), xy(0.155, 0.070), WHITE_C),
            Primaries::FilmC => (xy(0.681, 0.319), xy(0.243, 0.692), xy(0.145, 0.049), WHITE_C),
            Primaries::AcesAp0 => (
                xy(0.7347, 0.2653),
                xy(0.0000, 1.0000),
                xy(0.0001, -0.0770),
                WHITE_ACES,
            ),
            Primaries::AcesAp1 => (xy(0.713, 0.293), xy(0.165, 0.830), xy(0.128, 0.044), WHITE_ACES),
        };
        PrimaryCoordinates {
            red,
            green,
            blue,
            white,
        }
    }
}

/// Transfer characteristics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransferCharacteristics {
    /// Unknown
    #[default]
    Auto,
    /// ITU-R BT.1886
    Bt1886,
    /// IEC 61966-2-4 sRGB
    Srgb,
    /// Linear light
    Linear,
    /// Pure power gamma 1.8
    Gamma18,
    /// Pure power gamma 2.0
    Gamma20,
    /// Pure power gamma 2.2
    Gamma22,
    /// Pure power gamma 2.4
    Gamma24,
    /// Pure power gamma 2.6
    Gamma26,
    /// Pure power gamma 2.8
    Gamma28,
    /// ProPhoto RGB (ROMM)
    ProPhoto,
    /// SMPTE ST 428-1
    St428,
    /// ITU-R BT.2100 PQ, SMPTE ST 2084
    Pq,
    /// ITU-R BT.2100 HLG
    Hlg,
    /// Panasonic V-Log
    VLog,
    /// Sony S-Log1
    SLog1,
    /// Sony S-Log2
    SLog2,
}

/// Static HDR metadata of the mastering display and the content
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HdrMetadata {
    /// Mastering display primaries
    pub primaries: PrimaryCoordinates,
    /// Minimum mastering display luminance in cd/m²
    pub min_luma: f32,
    /// Maximum mastering display luminance in cd/m²
    pub max_luma: f32,
    /// Maximum content light level in cd/m²
    pub max_cll: f32,
    /// Maximum frame average light level in cd/m²
    pub max_fall: f32,
}

/// Colorspace of a video stream
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColorSpace {
    /// Color primaries
    pub primaries: Primaries,
    /// Transfer characteristics
    pub transfer: TransferCharacteristics,
    /// HDR metadata
    pub hdr: HdrMetadata,
}
