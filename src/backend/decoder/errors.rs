//! Extended error bits reported by the codec engine
//!
//! Bits 8 to 15 are common to all codecs, the others are codec specific. Each codec has a
//! table of 32 `(name, description)` pairs indexed by bit number.

use super::Codec;

bitflags::bitflags! {
    /// The common part of an extended error word
    ///
    /// Codec specific bits are retained but have no named flag, see [`describe_error`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtendedError: u32 {
        /// Sequence parameters changed
        const PARAMS_CHANGE = 1 << 8;
        /// Errors were concealed
        const APPLIED_CONCEALMENT = 1 << 9;
        /// Not enough input data
        const INSUFFICIENT_DATA = 1 << 10;
        /// Corrupted data
        const CORRUPTED_DATA = 1 << 11;
        /// Corrupted header
        const CORRUPTED_HEADER = 1 << 12;
        /// Unsupported feature in the input
        const UNSUPPORTED_INPUT = 1 << 13;
        /// Unsupported parameter or configuration
        const UNSUPPORTED_PARAM = 1 << 14;
        /// The decoder cannot continue
        const FATAL = 1 << 15;
    }
}

/// H.264: the referenced sequence parameter set is not available
pub const H264_UNAVAILABLE_SPS: u32 = 5;
/// H.264: end of stream
pub const H264_STREAM_END: u32 = 18;
/// MPEG-4: end of stream
pub const MPEG4_STREAM_END: u32 = 19;
/// MPEG-1/2: trick mode
pub const MPEG2_TRICK_MODE: u32 = 26;

type ErrorTable = [(&'static str, &'static str); 32];

const H264_ERRORS: ErrorTable = [
    ("ERR_NOSLICE", "No error-free slice header detected in the frame"),
    ("ERR_SPS", "Error in SPS parsing"),
    ("ERR_PPS", "Error during PPS parsing"),
    ("ERR_SLICEHDR", "Error in slice header parsing"),
    ("ERR_MBDATA", "Error in MB data parsing"),
    ("ERR_UNAVAILABLESPS", "SPS referred in the header is not available"),
    ("ERR_UNAVAILABLEPPS", "PPS referred in the header is not available"),
    ("ERR_INVALIDPARAM_IGNORE", "Invalid Parameter"),
    ("XDM_PARAMSCHANGE", "Sequence Parameters Change"),
    ("XDM_APPLIEDCONCEALMENT", "Applied concealment"),
    ("XDM_INSUFFICIENTDATA", "Insufficient input data"),
    ("XDM_CORRUPTEDDATA", "Data problem/corruption"),
    ("XDM_CORRUPTEDHEADER", "Header problem/corruption"),
    ("XDM_UNSUPPORTEDINPUT", "Unsupported feature/parameter in input"),
    ("XDM_UNSUPPORTEDPARAM", "Unsupported input parameter or configuration"),
    ("XDM_FATALERROR", "Fatal error"),
    ("ERR_UNSUPPFEATURE", "Unsupported feature"),
    ("ERR_METADATA_BUFOVERFLOW", "SEI Buffer overflow detected"),
    ("ERR_STREAM_END", "End of stream reached"),
    ("ERR_NO_FREEBUF", "No free buffers available for reference storing reference frame"),
    ("ERR_PICSIZECHANGE", "Change in resolution detected"),
    ("ERR_UNSUPPRESOLUTION", "Unsupported resolution by the decoder"),
    ("ERR_NUMREF_FRAMES", "maxNumRefFrames parameter is not compliant to stream properties"),
    ("ERR_INVALID_MBOX_MESSAGE", "Invalid (unexpected) mail box message received by M3/M4 or IVAHD"),
    ("ERR_DATA_SYNC", "In data sync enable mode, the input supplied is wrong"),
    ("ERR_MISSINGSLICE", "Missing slice in a frame"),
    ("ERR_INPUT_DATASYNC_PARAMS", "Input data sync enable mode, the input parameter is wrong"),
    (
        "ERR_HDVICP2_IMPROPER_STATE",
        "IVAHD standby failed or couldn't turn-on/off the IP's clock or HDVICP reset failed",
    ),
    (
        "ERR_TEMPORAL_DIRECT_MODE",
        "Temporal direct mode is present in the bits stream when disableTemporalDirect parameter (create time) is set",
    ),
    ("ERR_DISPLAYWIDTH", "DisplayWidth is less than the Image width + Padded width"),
    ("ERR_NOHEADER", "Indicates that no SPS/PPS header is decoded in the current process call"),
    (
        "ERR_GAPSINFRAMENUM",
        "Indicates that a gap is detected in frame_num for a stream with gaps_in_frame_num_value_allowed_flag 1 in SPS",
    ),
];

const MPEG4_ERRORS: ErrorTable = [
    ("ERR_VOS", "No Video Object Sequence detected in the frame"),
    ("ERR_VO", "Incorrect Video Object type"),
    ("ERR_VOL", "Error in Video Object Layer detected"),
    ("ERR_GOV", "Error in Group of Video parsing"),
    ("ERR_VOP", "Error in Video Object Plane parsing"),
    ("ERR_SHORTHEADER", "Error in short header parsing"),
    ("ERR_GOB", "Error in GOB parsing"),
    ("ERR_VIDEOPACKET", "Error in Video Packet parsing"),
    ("XDM_PARAMSCHANGE", "Sequence Parameters Change"),
    ("XDM_APPLIEDCONCEALMENT", "Applied concealment"),
    ("XDM_INSUFFICIENTDATA", "Insufficient input data"),
    ("XDM_CORRUPTEDDATA", "Data problem/corruption"),
    ("XDM_CORRUPTEDHEADER", "Header problem/corruption"),
    ("XDM_UNSUPPORTEDINPUT", "Unsupported feature/parameter in input"),
    ("XDM_UNSUPPORTEDPARAM", "Unsupported input parameter or configuration"),
    ("XDM_FATALERROR", "Fatal error"),
    ("ERR_MBDATA", "Error in MB data parsing"),
    ("ERR_INVALIDPARAM_IGNORE", "Invalid Parameter"),
    ("ERR_UNSUPPFEATURE", "Unsupported feature"),
    ("ERR_STREAM_END", "End of stream reached"),
    ("ERR_VALID_HEADER_NOT_FOUND", "Valid header not found.i.e (VOL/VOP not found)"),
    ("ERR_UNSUPPRESOLUTION", "Unsupported resolution by the decoder"),
    ("ERR_BITSBUF_UNDERFLOW", "The stream buffer has underflowed"),
    ("ERR_INVALID_MBOX_MESSAGE", "Invalid (unexpected) mail box message received by IVAHD"),
    ("ERR_NO_FRAME_FOR_FLUSH", "Codec does not have any frame for flushing out to application"),
    ("ERR_VOP_NOT_CODED", "Given VOP is not codec"),
    ("ERR_START_CODE_NOT_PRESENT", "Start code for given stream is not present in case of Parse Header"),
    ("ERR_VOP_TIME_INCREMENT_RES_ZERO", "Unsupported time increment resolution by the decoder"),
    ("ERR_PICSIZECHANGE", "Resolution gets change in between process call"),
    ("ERR_UNSUPPORTED_H263_ANNEXS", "Unsupported Annex S of the H263"),
    ("ERR_HDVICP2_IMPROPER_STATE", "HDVCIP is not in correct state"),
    ("ERR_IFRAME_DROPPED", "Current frame is lost, no frame is present for decode"),
];

const MPEG2_ERRORS: ErrorTable = [
    ("ERR_UNSUPPORTED_VIDDEC3PARAMS", "Unsupported VIDDEC3PARAMS"),
    ("ERR_UNSUPPORTED_VIDDEC3DYNAMICPARAMS", "Unsupported VIDDEC3 Dynamic PARAMS"),
    ("ERR_UNSUPPORTED_MPEG2DECDYNAMICPARAMS", "Unsupported MPEG1/2 VIDDEC3 Dynamic PARAMS"),
    ("ERR_IMPROPER_DATASYNC_SETTING", "Improper data sync setting"),
    ("ERR_NOSLICE", "No slice"),
    ("ERR_SLICEHDR", "Slice header corruption"),
    ("ERR_MBDATA", "MB data corruption"),
    ("ERR_UNSUPPFEATURE", "Unsupported MPEG1/2 feature"),
    ("XDM_PARAMSCHANGE", "Sequence Parameters Change"),
    ("XDM_APPLIEDCONCEALMENT", "Applied concealment"),
    ("XDM_INSUFFICIENTDATA", "Insufficient input data"),
    ("XDM_CORRUPTEDDATA", "Data problem/corruption"),
    ("XDM_CORRUPTEDHEADER", "Header problem/corruption"),
    ("XDM_UNSUPPORTEDINPUT", "Unsupported feature/parameter in input"),
    ("XDM_UNSUPPORTEDPARAM", "Unsupported input parameter or configuration"),
    ("XDM_FATALERROR", "Fatal error"),
    ("ERR_STREAM_END", "End of stream"),
    ("ERR_UNSUPPRESOLUTION", "Unsupported resolution"),
    ("ERR_STANDBY", "IVAHD standby"),
    ("ERR_INVALID_MBOX_MESSAGE", "Invalid mailbox message"),
    ("ERR_HDVICP_RESET", ""),
    ("ERR_HDVICP_WAIT_NOT_CLEAN_EXIT", ""),
    ("ERR_SEQHDR", "Sequence header corruption"),
    ("ERR_GOP_PICHDR", ""),
    ("ERR_SEQLVL_EXTN", ""),
    ("ERR_PICLVL_EXTN", ""),
    ("ERR_TRICK_MODE", ""),
    ("ERR_PICSIZECHANGE", "Picture size change. It will be set for a multi resolution"),
    ("ERR_SEMANTIC", ""),
    ("ERR_DECODE_EXIT", ""),
    ("ERR_IRES_RESHANDLE", ""),
    ("ERR_IRES_RESDESC", ""),
];

const VC1_ERRORS: ErrorTable = [
    ("ERR_UNSUPPORTED_VIDDEC3PARAMS", "Unsupported VIDDEC3PARAMS"),
    ("ERR_UNSUPPORTED_VIDDEC3DYNAMICPARAMS", "Unsupported VIDDEC3 Dynamic PARAMS"),
    ("ERR_UNSUPPORTED_VC1DECDYNAMICPARAMS", "Unsupported VC1 VIDDEC3 Dynamic PARAMS"),
    ("ERR_IMPROPER_DATASYNC_SETTING", "Improper data sync setting"),
    ("ERR_NOSLICE", "No slice"),
    ("ERR_SLICEHDR", "Slice header corruption"),
    ("ERR_MBDATA", "MB data corruption"),
    ("ERR_UNSUPPFEATURE", "Unsupported VC1 feature"),
    ("XDM_PARAMSCHANGE", "Sequence Parameters Change"),
    ("XDM_APPLIEDCONCEALMENT", "Applied concealment"),
    ("XDM_INSUFFICIENTDATA", "Insufficient input data"),
    ("XDM_CORRUPTEDDATA", "Data problem/corruption"),
    ("XDM_CORRUPTEDHEADER", "Header problem/corruption"),
    ("XDM_UNSUPPORTEDINPUT", "Unsupported feature/parameter in input"),
    ("XDM_UNSUPPORTEDPARAM", "Unsupported input parameter or configuration"),
    ("XDM_FATALERROR", "Fatal error"),
    ("ERR_STREAM_END", "End of stream"),
    ("ERR_UNSUPPRESOLUTION", "Unsupported resolution"),
    ("ERR_STANDBY", "IVAHD standby"),
    ("ERR_INVALID_MBOX_MESSAGE", "Invalid mailbox message"),
    ("ERR_SEQHDR", "Sequence header corruption"),
    ("ERR_ENTRYHDR", "Entry point header corruption"),
    ("ERR_PICHDR", "Picture header corruption"),
    ("ERR_REF_PICTURE_BUFFER", "Reference picture Buffer"),
    ("ERR_NOSEQUENCEHEADER", "There is no sequence header start code"),
    ("", ""),
    ("", ""),
    ("", ""),
    ("", ""),
    ("", ""),
    ("ERR_BUFDESC", "Invalid values of input/output buffer descriptors"),
    ("ERR_PICSIZECHANGE", "Picture size change. It will be set for a multi resolution"),
];

fn table(codec: Codec) -> &'static ErrorTable {
    match codec {
        Codec::H264 => &H264_ERRORS,
        Codec::Mpeg4 => &MPEG4_ERRORS,
        Codec::Mpeg2 | Codec::Mpeg1 => &MPEG2_ERRORS,
        Codec::Vc1 | Codec::Wmv3 => &VC1_ERRORS,
    }
}

/// Symbolic name and description of `bit` for `codec`
///
/// `None` for bits without a name.
pub fn error_bit(codec: Codec, bit: u32) -> Option<(&'static str, &'static str)> {
    table(codec)
        .get(bit as usize)
        .copied()
        .filter(|(name, _)| !name.is_empty())
}

/// Names of all bits set in `bits`, lowest bit first, separated by spaces
pub fn describe_error(codec: Codec, bits: u32) -> String {
    (0..32)
        .filter(|bit| bits & (1 << bit) != 0)
        .filter_map(|bit| error_bit(codec, bit).map(|(name, _)| name))
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_bit(bits: u32, bit: u32) -> bool {
    bits & (1 << bit) != 0
}

impl ExtendedError {
    /// Wraps a raw error word, keeping codec specific bits
    pub fn from_raw(bits: u32) -> ExtendedError {
        ExtendedError::from_bits_retain(bits)
    }

    /// Whether the decoder cannot continue
    pub fn is_fatal(self) -> bool {
        self.contains(ExtendedError::FATAL)
    }

    /// Whether the error is expected for `codec` and not worth a warning
    ///
    /// H.264: missing SPS together with a corrupted header. MPEG-1/2: trick mode.
    /// MPEG-4: corrupted header.
    pub fn is_benign(self, codec: Codec) -> bool {
        let bits = self.bits();
        match codec {
            Codec::H264 => {
                has_bit(bits, H264_UNAVAILABLE_SPS) && self.contains(ExtendedError::CORRUPTED_HEADER)
            }
            Codec::Mpeg2 | Codec::Mpeg1 => has_bit(bits, MPEG2_TRICK_MODE),
            Codec::Mpeg4 => self.contains(ExtendedError::CORRUPTED_HEADER),
            Codec::Vc1 | Codec::Wmv3 => false,
        }
    }

    /// Whether the codec signals that flushing is complete
    pub fn is_stream_end(self, codec: Codec) -> bool {
        match codec {
            Codec::H264 => has_bit(self.bits(), H264_STREAM_END),
            Codec::Mpeg4 => has_bit(self.bits(), MPEG4_STREAM_END),
            _ => false,
        }
    }
}
