//! Codecs handled by the decoder and their buffer requirements

use std::fmt;

const fn tag(a: u8, b: u8, c: u8, d: u8) -> u32 {
    a as u32 | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
}

/// Maximum number of buffers the H.264 decoder keeps for reference and reordering
pub const H264_MAX_IO_BUFFERS: usize = 20;

/// Extra buffers allocated on top of what the codec and the swapchain need
pub const POOL_HEADROOM: usize = 25;

/// A codec decodable by the IVA-HD engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264 / AVC
    H264,
    /// MPEG-4 part 2 (DivX, Xvid)
    Mpeg4,
    /// MPEG-2 video
    Mpeg2,
    /// MPEG-1 video
    Mpeg1,
    /// VC-1 advanced profile
    Vc1,
    /// Windows Media Video 9 (VC-1 simple/main profile)
    Wmv3,
}

impl Codec {
    /// All supported codecs in order of preference
    pub const ALL: [Codec; 6] = [
        Codec::H264,
        Codec::Mpeg4,
        Codec::Mpeg2,
        Codec::Mpeg1,
        Codec::Vc1,
        Codec::Wmv3,
    ];

    /// Resolves a stream fourcc tag
    ///
    /// Small values are the numeric tags used by MPEG program streams.
    pub fn from_tag(value: u32) -> Option<Codec> {
        const H264: [u32; 8] = [
            0x1000_0005,
            0x0000_0005,
            tag(b'H', b'2', b'6', b'4'),
            tag(b'h', b'2', b'6', b'4'),
            tag(b'X', b'2', b'6', b'4'),
            tag(b'x', b'2', b'6', b'4'),
            tag(b'A', b'V', b'C', b'1'),
            tag(b'a', b'v', b'c', b'1'),
        ];
        const MPEG4: [u32; 13] = [
            0x1000_0004,
            0x0000_0004,
            tag(b'F', b'M', b'P', b'4'),
            tag(b'f', b'm', b'p', b'4'),
            tag(b'M', b'P', b'4', b'V'),
            tag(b'm', b'p', b'4', b'v'),
            tag(b'X', b'V', b'I', b'D'),
            tag(b'x', b'v', b'i', b'd'),
            tag(b'X', b'v', b'i', b'D'),
            tag(b'X', b'V', b'I', b'X'),
            tag(b'D', b'X', b'5', b'0'),
            tag(b'D', b'X', b'G', b'M'),
            tag(b'D', b'I', b'V', b'X'),
        ];
        const MPEG2: [u32; 8] = [
            0x1000_0002,
            0x0000_0002,
            tag(b'm', b'p', b'g', b'2'),
            tag(b'M', b'P', b'G', b'2'),
            tag(b'M', b'7', b'0', b'1'),
            tag(b'm', b'2', b'v', b'1'),
            tag(b'm', b'2', b'2', b'v'),
            tag(b'm', b'p', b'g', b'v'),
        ];
        const MPEG1: [u32; 5] = [
            0x1000_0001,
            0x0000_0001,
            tag(b'm', b'p', b'g', b'1'),
            tag(b'M', b'P', b'G', b'1'),
            tag(b'm', b'1', b'v', b'1'),
        ];
        const VC1: [u32; 4] = [
            tag(b'W', b'V', b'C', b'1'),
            tag(b'w', b'v', b'c', b'1'),
            tag(b'V', b'C', b'-', b'1'),
            tag(b'v', b'c', b'-', b'1'),
        ];

        if H264.contains(&value) {
            Some(Codec::H264)
        } else if MPEG4.contains(&value) {
            Some(Codec::Mpeg4)
        } else if MPEG2.contains(&value) {
            Some(Codec::Mpeg2)
        } else if MPEG1.contains(&value) {
            Some(Codec::Mpeg1)
        } else if VC1.contains(&value) {
            Some(Codec::Vc1)
        } else if value == tag(b'W', b'M', b'V', b'3') {
            Some(Codec::Wmv3)
        } else {
            None
        }
    }

    /// Resolves a codec by its player name (`h264`, `mpeg2video`, ...)
    pub fn from_name(name: &str) -> Option<Codec> {
        Codec::ALL.into_iter().find(|codec| codec.name() == name)
    }

    /// Resolves the codec of a stream
    ///
    /// A zero tag falls back to the codec name, any other tag has to be known.
    pub fn resolve(tag: u32, name: &str) -> Option<Codec> {
        if tag == 0 {
            Codec::from_name(name)
        } else {
            Codec::from_tag(tag)
        }
    }

    /// Name of the codec as used by the player
    pub fn name(self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::Mpeg4 => "mpeg4",
            Codec::Mpeg2 => "mpeg2video",
            Codec::Mpeg1 => "mpeg1video",
            Codec::Vc1 => "vc1",
            Codec::Wmv3 => "wmv3",
        }
    }

    /// Name of the codec server inside the engine
    pub fn engine_name(self) -> &'static str {
        match self {
            Codec::H264 => "ivahd_h264dec",
            Codec::Mpeg4 => "ivahd_mpeg4dec",
            Codec::Mpeg2 | Codec::Mpeg1 => "ivahd_mpeg2vdec",
            Codec::Vc1 | Codec::Wmv3 => "ivahd_vc1vdec",
        }
    }

    /// Buffers the codec holds on its own
    pub fn base_buffers(self) -> usize {
        match self {
            Codec::H264 => H264_MAX_IO_BUFFERS,
            Codec::Mpeg4 | Codec::Vc1 | Codec::Wmv3 => 4,
            Codec::Mpeg2 | Codec::Mpeg1 => 3,
        }
    }

    /// Size of the output buffer pool for a display with `swapchain_depth`
    pub fn pool_size(self, swapchain_depth: usize) -> usize {
        self.base_buffers() + swapchain_depth + POOL_HEADROOM
    }

    /// Whether output buffers are acquired after the header was parsed
    pub fn late_acquire(self) -> bool {
        matches!(self, Codec::Mpeg4 | Codec::Vc1 | Codec::Wmv3)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn align(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Dimensions of the buffers a codec decodes into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Largest picture width, the display width aligned to 16
    pub max_width: u32,
    /// Largest picture height, the display height aligned to 16
    pub max_height: u32,
    /// Buffer width including the codec's padding
    pub width: u32,
    /// Buffer height including the codec's padding
    pub height: u32,
    /// Size of the decoded picture buffer in frames (H.264 only)
    pub dpb_frames: Option<u32>,
}

impl FrameGeometry {
    /// Buffer layout for decoding `codec` at `width` x `height`
    pub fn new(codec: Codec, width: u32, height: u32) -> FrameGeometry {
        let max_width = align(width, 16);
        let max_height = align(height, 16);
        let (padded_w, padded_h) = match codec {
            Codec::H264 => (align(max_width + 32 * 2, 128), max_height + 4 * 24),
            Codec::Mpeg4 => (align(max_width + 32, 128), max_height + 32),
            Codec::Mpeg2 | Codec::Mpeg1 => (max_width, max_height),
            Codec::Vc1 | Codec::Wmv3 => (align(max_width + 32 * 2, 128), align(max_height / 2, 16) * 2 + 2 * 40),
        };
        let dpb_frames = match codec {
            Codec::H264 => {
                let macroblocks = (width / 16) * (height / 16);
                Some(if macroblocks == 0 { 16 } else { (184_320 / macroblocks).min(16) })
            }
            _ => None,
        };
        FrameGeometry {
            max_width,
            max_height,
            width: padded_w,
            height: padded_h,
            dpb_frames,
        }
    }

    /// Bytes of the luma plane
    pub fn luma_size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes of the interleaved chroma plane
    pub fn chroma_size(&self) -> usize {
        self.width as usize * (self.height / 2) as usize
    }
}

/// Family of all decoders in this module
pub const DECODER_FAMILY: &str = "omap_dce";

/// A decoder advertised to the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderInfo {
    /// Decoder family
    pub family: &'static str,
    /// Codec name
    pub codec: &'static str,
    /// Decoder name
    pub decoder: String,
    /// Human readable description
    pub description: &'static str,
}

impl DecoderInfo {
    fn new(codec: Codec) -> DecoderInfo {
        DecoderInfo {
            family: DECODER_FAMILY,
            codec: codec.name(),
            decoder: format!("{}_{}", DECODER_FAMILY, codec.name()),
            description: "omap_dce video decoder",
        }
    }
}

/// All decoders
pub fn decoder_list() -> Vec<DecoderInfo> {
    Codec::ALL.into_iter().map(DecoderInfo::new).collect()
}

/// Decoders for the codec named `codec`, empty if it is not supported
pub fn select_codec(codec: &str) -> Vec<DecoderInfo> {
    Codec::from_name(codec).map(DecoderInfo::new).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags() {
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"avc1")), Some(Codec::H264));
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"XviD")), Some(Codec::Mpeg4));
        assert_eq!(Codec::from_tag(0x1000_0002), Some(Codec::Mpeg2));
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"m1v1")), Some(Codec::Mpeg1));
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"VC-1")), Some(Codec::Vc1));
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"WMV3")), Some(Codec::Wmv3));
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"wmv3")), None);
        assert_eq!(Codec::from_tag(u32::from_le_bytes(*b"hevc")), None);
    }

    #[test]
    fn name_fallback_only_without_tag() {
        assert_eq!(Codec::resolve(0, "mpeg2video"), Some(Codec::Mpeg2));
        assert_eq!(Codec::resolve(0, "hevc"), None);
        assert_eq!(Codec::resolve(u32::from_le_bytes(*b"hev1"), "h264"), None);
    }

    #[test]
    fn padded_geometry() {
        let h264 = FrameGeometry::new(Codec::H264, 1920, 1080);
        assert_eq!((h264.max_width, h264.max_height), (1920, 1088));
        assert_eq!((h264.width, h264.height), (2048, 1184));
        assert_eq!(h264.dpb_frames, Some(16));

        let mpeg4 = FrameGeometry::new(Codec::Mpeg4, 720, 576);
        assert_eq!((mpeg4.width, mpeg4.height), (768, 608));

        let mpeg2 = FrameGeometry::new(Codec::Mpeg2, 720, 480);
        assert_eq!((mpeg2.width, mpeg2.height), (720, 480));

        let vc1 = FrameGeometry::new(Codec::Vc1, 1280, 720);
        assert_eq!((vc1.width, vc1.height), (1408, 816));
        assert_eq!(vc1.luma_size(), 1408 * 816);
        assert_eq!(vc1.chroma_size(), 1408 * 408);
    }

    #[test]
    fn h264_dpb_for_large_pictures() {
        // 4096x2304: 256 * 144 macroblocks
        assert_eq!(FrameGeometry::new(Codec::H264, 4096, 2304).dpb_frames, Some(5));
        assert_eq!(FrameGeometry::new(Codec::H264, 8, 8).dpb_frames, Some(16));
    }

    #[test]
    fn pool_sizes() {
        assert_eq!(Codec::H264.pool_size(3), 48);
        assert_eq!(Codec::Mpeg2.pool_size(3), 31);
        assert_eq!(Codec::Wmv3.pool_size(1), 30);
    }

    #[test]
    fn advertised_decoders() {
        let list = decoder_list();
        assert_eq!(list.len(), 6);
        assert!(list.iter().all(|info| info.family == "omap_dce"));
        assert_eq!(select_codec("vc1")[0].decoder, "omap_dce_vc1");
        assert!(select_codec("av1").is_empty());
    }
}
