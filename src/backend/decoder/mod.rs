//! Hardware video decoding on the IVA-HD coprocessor of OMAP5/DRA7 SoCs
//!
//! [`DceDecoder`] feeds compressed packets through an input dumb buffer into a
//! [`CodecEngine`] and decodes into a pool of NV12 framebuffers allocated through a
//! [`BufferProvider`], usually the [`VideoOutput`](crate::backend::vo::VideoOutput) the frames
//! are shown on. Decoded frames reference their pool buffer directly, no copy is made.
//!
//! A pool buffer is `free` while the codec does not reference it and `locked` while it is on
//! its way to or on the screen. Packets are only accepted while some buffer is both, see
//! [`FrameBuffer::is_available`](crate::backend::allocator::FrameBuffer::is_available).

use tracing::{debug, error, info_span, warn};

use crate::backend::allocator::{BufferError, BufferRef, DumbBuffer, Fourcc};
use crate::backend::drm::KmsDevice;
use crate::backend::video::VideoFrame;
use crate::backend::vo::BufferProvider;

mod codec;
mod engine;
mod errors;
mod pts;

pub use self::codec::{
    decoder_list, select_codec, Codec, DecoderInfo, FrameGeometry, DECODER_FAMILY, H264_MAX_IO_BUFFERS,
    POOL_HEADROOM,
};
pub use self::engine::{
    CodecEngine, ContentType, EngineConfig, EngineError, FrameSkip, ProcessInput, ProcessOutput, ProcessStatus,
};
pub use self::errors::{describe_error, error_bit, ExtendedError};
pub use self::pts::{BufferedPts, PtsQueue};

/// Errors of the decoder
#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    /// The stream's codec cannot be decoded
    #[error("Unsupported codec {name} (tag {tag:08x})")]
    UnsupportedCodec {
        /// Fourcc tag of the stream
        tag: u32,
        /// Codec name of the stream
        name: String,
    },
    /// An engine call failed
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A buffer could not be allocated
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The packet carries no data
    #[error("Empty packet")]
    EmptyPacket,
    /// The packet does not fit into the input buffer
    #[error("Packet of {len} bytes exceeds the input buffer of {capacity} bytes")]
    PacketTooLarge {
        /// Size of the packet
        len: usize,
        /// Size of the input buffer
        capacity: usize,
    },
    /// The input buffer is not mapped or not exported
    #[error("Input buffer is not available")]
    NoInputBuffer,
    /// Every pool buffer is in use, retry once the display released one
    #[error("No free video buffer")]
    Again,
    /// More packets are in flight than the pool has buffers
    #[error("Timestamp queue overflow")]
    TimestampOverflow,
    /// The codec reported a fatal error
    #[error("Fatal decode error {bits:08x}: {description}")]
    Fatal {
        /// Extended error bits
        bits: u32,
        /// Names of the set bits
        description: String,
    },
    /// The process call itself failed
    #[error("Decoding failed: {0:?}")]
    ProcessFailed(ProcessStatus),
}

/// Codec parameters of a video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Fourcc tag, zero if unknown
    pub tag: u32,
    /// Codec name
    pub codec: String,
    /// Display width
    pub width: u32,
    /// Display height
    pub height: u32,
}

/// A compressed packet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    /// Compressed data
    pub data: Vec<u8>,
    /// Presentation timestamp in seconds
    pub pts: Option<f64>,
    /// Decoding timestamp in seconds
    pub dts: Option<f64>,
    /// Duration in seconds
    pub duration: Option<f64>,
}

/// Frame dropping requested by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameDrop {
    /// Decode everything
    #[default]
    None,
    /// Drop frames to keep up with playback
    Normal,
    /// Drop frames while seeking precisely
    HrSeek,
}

impl FrameDrop {
    /// Parses the player's framedrop flags
    pub fn from_flags(flags: i32) -> FrameDrop {
        match flags {
            1 => FrameDrop::Normal,
            2 => FrameDrop::HrSeek,
            _ => FrameDrop::None,
        }
    }

    fn frame_skip(self) -> FrameSkip {
        match self {
            FrameDrop::None => FrameSkip::None,
            FrameDrop::Normal => FrameSkip::NonReference,
            FrameDrop::HrSeek => FrameSkip::Intra,
        }
    }
}

/// Requests to [`DceDecoder::control`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderControl {
    /// Name of the hardware decoding api in use
    GetHwdec,
    /// Change frame dropping
    SetFramedrop(FrameDrop),
    /// Whether the decoder gave up on the stream
    CheckForcedEof,
    /// Number of B-frames
    GetBFrames,
    /// Fall back to software decoding
    ForceHwdecFallback,
    /// Reinitialize the decoder
    Reinit,
}

/// Answers of [`DceDecoder::control`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderReply {
    /// The hardware decoding api, none as frames are native framebuffers
    Hwdec(Option<String>),
    /// Whether the decoder gave up on the stream
    ForcedEof(bool),
    /// The request was handled
    Done,
    /// The request is not supported
    Unknown,
}

/// Input of [`DceDecoder::process`]
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderInput {
    /// A packet to decode
    Packet(Packet),
    /// End of the stream
    Eof,
}

/// Output of [`DceDecoder::process`]
#[derive(Debug)]
pub enum DecoderOutput {
    /// A decoded frame
    Frame(VideoFrame),
    /// The packet was consumed without a frame coming out
    Progress,
    /// End of the stream
    Eof,
    /// The packet could not be decoded
    Failed(DecoderError),
}

/// Hardware decoder for one stream
#[derive(Debug)]
pub struct DceDecoder<E: CodecEngine, D: KmsDevice> {
    codec: Codec,
    geometry: FrameGeometry,
    engine: E,
    engine_open: bool,
    dev: D,
    input: DumbBuffer,
    buffers: Vec<BufferRef>,
    pts: PtsQueue,
    framedrop: FrameDrop,
    force_eof: bool,
    flushed: bool,
    span: tracing::Span,
}

impl<E: CodecEngine, D: KmsDevice> DceDecoder<E, D> {
    /// Opens a decoder for `stream`
    ///
    /// Allocates `codec.pool_size(swapchain_depth)` output buffers from `provider`. On failure
    /// everything created so far is released again.
    pub fn create(
        stream: &StreamInfo,
        engine: E,
        dev: D,
        provider: &mut dyn BufferProvider,
        swapchain_depth: usize,
    ) -> Result<DceDecoder<E, D>, DecoderError> {
        let span = info_span!("omap_dce", codec = %stream.codec);
        let codec = Codec::resolve(stream.tag, &stream.codec).ok_or_else(|| {
            error!(parent: &span, "Unsupported codec {}, tag {:08x}", stream.codec, stream.tag);
            DecoderError::UnsupportedCodec {
                tag: stream.tag,
                name: stream.codec.clone(),
            }
        })?;
        let geometry = FrameGeometry::new(codec, stream.width, stream.height);
        let pool_size = codec.pool_size(swapchain_depth);

        let mut decoder = DceDecoder {
            codec,
            geometry,
            engine,
            engine_open: false,
            dev,
            input: DumbBuffer::default(),
            buffers: Vec::with_capacity(pool_size),
            pts: PtsQueue::new(pool_size),
            framedrop: FrameDrop::None,
            force_eof: false,
            flushed: true,
            span,
        };
        if let Err(err) = decoder.init(provider, pool_size) {
            error!(parent: &decoder.span, "Failed to initialize decoder: {}", err);
            decoder.teardown(provider);
            return Err(err);
        }
        Ok(decoder)
    }

    fn init(&mut self, provider: &mut dyn BufferProvider, pool_size: usize) -> Result<(), DecoderError> {
        let _guard = self.span.enter();

        self.engine.open(&EngineConfig::new(self.codec, self.geometry))?;
        self.engine_open = true;
        debug!("Using {}", self.codec.engine_name());
        self.engine.set_frame_skip(FrameSkip::None)?;

        let (width, height) = (self.geometry.width, self.geometry.height);
        self.input = DumbBuffer::allocate(&self.dev, width, height, 8)?;
        self.input.map(&self.dev)?;
        self.input.export(&self.dev)?;
        if let Some(fd) = self.input.dma_buf() {
            self.engine.lock_buffer(fd);
        }

        for index in 0..pool_size {
            let buffer = provider.alloc_buffer(Fourcc::Nv12, width, height).map_err(|err| {
                error!("Failed to create output buffer {}", index);
                err
            })?;
            buffer.set_index(index);
            buffer.set_locked(false);
            buffer.set_free(true);
            self.buffers.push(buffer);
        }
        debug!(pool_size, width, height, "Allocated output buffers");
        Ok(())
    }

    /// The codec being decoded
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Layout of the output buffers
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// The output buffer pool
    pub fn buffers(&self) -> &[BufferRef] {
        &self.buffers
    }

    /// Whether the decoder gave up on the stream
    pub fn is_forced_eof(&self) -> bool {
        self.force_eof
    }

    /// Handles a control request
    pub fn control(&mut self, request: DecoderControl) -> DecoderReply {
        match request {
            DecoderControl::GetHwdec => DecoderReply::Hwdec(None),
            DecoderControl::SetFramedrop(framedrop) => {
                self.framedrop = framedrop;
                DecoderReply::Done
            }
            DecoderControl::CheckForcedEof => DecoderReply::ForcedEof(self.force_eof),
            DecoderControl::GetBFrames | DecoderControl::ForceHwdecFallback | DecoderControl::Reinit => {
                DecoderReply::Unknown
            }
        }
    }

    fn lock_buffer(&mut self, buffer: &BufferRef) {
        if let Some(fd) = buffer.framebuffer().buffer().dma_buf() {
            self.engine.lock_buffer(fd);
        }
        buffer.set_free(false);
        buffer.reset();
    }

    fn unlock_buffer(&mut self, buffer: &BufferRef) {
        if buffer.is_free() {
            error!("Already unlocked frame buffer at index {}", buffer.index());
            return;
        }
        if let Some(fd) = buffer.framebuffer().buffer().dma_buf() {
            self.engine.unlock_buffer(fd);
        }
        buffer.set_free(true);
    }

    fn release_freed(&mut self, freed: &[usize], unlock_display: bool) {
        for &index in freed {
            let buffer = match self.buffers.get(index) {
                Some(buffer) => buffer.clone(),
                None => {
                    warn!("Codec freed unknown buffer {}", index);
                    continue;
                }
            };
            if let Some(fd) = buffer.framebuffer().buffer().dma_buf() {
                self.engine.unlock_buffer(fd);
            }
            buffer.set_free(true);
            if unlock_display {
                buffer.set_locked(false);
            }
        }
    }

    fn fail(&mut self, buffer: &BufferRef, err: DecoderError) -> DecoderError {
        self.unlock_buffer(buffer);
        self.force_eof = true;
        err
    }

    /// Decodes one packet
    ///
    /// Returns the next frame in presentation order, if the codec output one. Fails with
    /// [`DecoderError::Again`] if no pool buffer is available. Fatal codec errors force the end
    /// of the stream.
    #[profiling::function]
    pub fn decode_packet(&mut self, packet: &Packet) -> Result<Option<VideoFrame>, DecoderError> {
        let _guard = self.span.clone().entered();
        if packet.data.is_empty() {
            return Err(DecoderError::EmptyPacket);
        }
        let capacity = self.input.size() as usize;
        if packet.data.len() > capacity {
            return Err(DecoderError::PacketTooLarge {
                len: packet.data.len(),
                capacity,
            });
        }
        if self.input.dma_buf().is_none() {
            return Err(DecoderError::NoInputBuffer);
        }

        let buffer = match self.buffers.iter().find(|buffer| buffer.is_available()) {
            Some(buffer) => buffer.clone(),
            None => {
                error!("Failed get video buffer");
                return Err(DecoderError::Again);
            }
        };
        self.lock_buffer(&buffer);

        if !self.pts.push(packet.pts, packet.dts, packet.duration) {
            error!("Failed push pts to array");
            return Err(self.fail(&buffer, DecoderError::TimestampOverflow));
        }

        if let Err(err) = self.engine.set_frame_skip(self.framedrop.frame_skip()) {
            error!("Failed to set frame skip mode: {}", err);
            return Err(self.fail(&buffer, err.into()));
        }

        match self.input.mapping_mut() {
            Some(map) => map[..packet.data.len()].copy_from_slice(&packet.data),
            None => return Err(self.fail(&buffer, DecoderError::NoInputBuffer)),
        }

        let output = {
            let fb = buffer.framebuffer();
            let fds = (self.input.dma_buf(), fb.buffer().dma_buf());
            match fds {
                (Some(input), Some(output)) => Some(self.engine.process(Some(ProcessInput {
                    buffer: input,
                    len: packet.data.len(),
                    output,
                    output_id: buffer.index(),
                }))),
                _ => None,
            }
        };
        let output = match output {
            Some(output) => output,
            None => return Err(self.fail(&buffer, DecoderError::NoInputBuffer)),
        };

        match output.status {
            ProcessStatus::Ok => {}
            ProcessStatus::CodecError => {
                let err = output.extended_error;
                let description = describe_error(self.codec, err.bits());
                if err.is_fatal() {
                    error!("Process call failed with fatal error {:08x}: {}", err.bits(), description);
                    return Err(self.fail(
                        &buffer,
                        DecoderError::Fatal {
                            bits: err.bits(),
                            description,
                        },
                    ));
                } else if !err.is_benign(self.codec) {
                    warn!("Decode error {:08x}: {}", err.bits(), description);
                }
            }
            status @ (ProcessStatus::Unsupported | ProcessStatus::IpcFailure | ProcessStatus::InvalidInput) => {
                error!("Process call failed: {:?}", status);
                return Err(self.fail(&buffer, DecoderError::ProcessFailed(status)));
            }
        }

        self.flushed = false;
        if output.buffers_in_use {
            warn!("Codec still uses its output buffers");
        }
        self.release_freed(&output.freed, false);

        let buffer = match output.outputs.first().and_then(|&index| self.buffers.get(index)) {
            Some(buffer) => buffer.clone(),
            None => return Ok(None),
        };
        buffer.set_locked(true);

        let mut frame = VideoFrame::hardware(buffer, output.active_region, None);
        if let Some(ts) = self.pts.pop_min() {
            frame.pts = Some(ts.pts);
            frame.dts = ts.dts;
            frame.duration = ts.duration;
        }

        match output.content {
            ContentType::TopField => warn!("Interlaced top field"),
            ContentType::BottomField => warn!("Interlaced bottom field"),
            ContentType::Progressive => {}
        }
        if output.repeat_first_field {
            warn!("Repeat first field");
        }
        Ok(Some(frame))
    }

    /// Moves one packet through the decoder
    pub fn process(&mut self, input: DecoderInput) -> DecoderOutput {
        let packet = match input {
            DecoderInput::Packet(packet) => packet,
            DecoderInput::Eof => return DecoderOutput::Eof,
        };
        match self.decode_packet(&packet) {
            Ok(Some(frame)) => DecoderOutput::Frame(frame),
            Ok(None) => DecoderOutput::Progress,
            Err(DecoderError::Again) => DecoderOutput::Failed(DecoderError::Again),
            Err(err) => {
                error!(parent: &self.span, "Decoding frame error: {}", err);
                DecoderOutput::Failed(err)
            }
        }
    }

    /// Drops all frames in flight, e.g. for seeking
    ///
    /// Flushes the codec unless nothing was decoded since the last flush, and resets frame
    /// dropping.
    pub fn reset(&mut self, provider: &mut dyn BufferProvider) {
        if !self.flushed {
            self.flush_all(provider);
            self.flushed = true;
        }
        self.framedrop = FrameDrop::None;
    }

    fn flush_all(&mut self, provider: &mut dyn BufferProvider) {
        let _guard = self.span.clone().entered();
        if let Err(err) = self.engine.flush() {
            error!("Failed to flush codec: {}", err);
            return;
        }

        // the codec can hold at most the whole pool
        for _ in 0..=self.buffers.len() {
            let output = self.engine.process(None);
            if output.status == ProcessStatus::CodecError {
                let err = output.extended_error;
                if err.is_fatal() {
                    if !matches!(self.codec, Codec::Mpeg1 | Codec::Mpeg2) {
                        error!("Flush ended with fatal error {:08x}", err.bits());
                    }
                    break;
                }
                if err.is_stream_end(self.codec) {
                    break;
                }
            }
            self.release_freed(&output.freed, true);
            if output.status != ProcessStatus::Ok {
                break;
            }
        }

        provider.reset_display();
        for buffer in &self.buffers {
            buffer.reset();
        }
        self.pts.clear();
    }

    /// Shuts the decoder down and releases its buffers
    pub fn destroy(mut self, provider: &mut dyn BufferProvider) {
        provider.reset_display();
        self.teardown(provider);
    }

    fn teardown(&mut self, provider: &mut dyn BufferProvider) {
        for buffer in self.buffers.drain(..) {
            provider.release_buffer(&buffer);
        }
        self.release_engine();
    }

    fn release_engine(&mut self) {
        if self.engine_open {
            if let Err(err) = self.engine.flush() {
                debug!(parent: &self.span, "Flush on close failed: {}", err);
            }
            if let Some(fd) = self.input.dma_buf() {
                self.engine.unlock_buffer(fd);
            }
        }
        self.input.destroy(&self.dev);
        if self.engine_open {
            self.engine.close();
            self.engine_open = false;
        }
    }
}

impl<E: CodecEngine, D: KmsDevice> Drop for DceDecoder<E, D> {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            warn!(parent: &self.span, "Decoder dropped with {} buffers allocated", self.buffers.len());
        }
        self.release_engine();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::os::unix::io::{AsRawFd, BorrowedFd};
    use std::sync::{Arc, Mutex, MutexGuard};

    use smallvec::smallvec;

    use super::*;
    use crate::backend::drm::testing::{Call, MockDevice};
    use crate::backend::vo::DumbAllocator;
    use crate::utils::Rectangle;

    fn same_fd(fd: BorrowedFd<'_>, other: BorrowedFd<'_>) -> bool {
        fd.as_raw_fd() == other.as_raw_fd()
    }

    #[derive(Debug, Default)]
    struct EngineState {
        config: Option<EngineConfig>,
        closed: bool,
        fail_open: bool,
        fail_control: bool,
        locked: Vec<i32>,
        skips: Vec<FrameSkip>,
        flushes: usize,
        inputs: Vec<(usize, usize)>,
        script: VecDeque<ProcessOutput>,
        drained: usize,
    }

    #[derive(Debug, Clone, Default)]
    struct MockEngine(Arc<Mutex<EngineState>>);

    impl MockEngine {
        fn state(&self) -> MutexGuard<'_, EngineState> {
            self.0.lock().unwrap()
        }

        fn push(&self, output: ProcessOutput) {
            self.state().script.push_back(output);
        }
    }

    impl CodecEngine for MockEngine {
        fn open(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
            let mut state = self.state();
            if state.fail_open {
                return Err(EngineError::Open("ivahd_vidsvr"));
            }
            state.config = Some(*config);
            Ok(())
        }

        fn lock_buffer(&mut self, buffer: BorrowedFd<'_>) {
            self.state().locked.push(buffer.as_raw_fd());
        }

        fn unlock_buffer(&mut self, buffer: BorrowedFd<'_>) {
            let mut state = self.state();
            let pos = state.locked.iter().position(|&fd| fd == buffer.as_raw_fd());
            state.locked.remove(pos.expect("unlocking a buffer that is not locked"));
        }

        fn set_frame_skip(&mut self, skip: FrameSkip) -> Result<(), EngineError> {
            let mut state = self.state();
            if state.fail_control {
                return Err(EngineError::Control {
                    call: "XDM_SETPARAMS",
                    code: -1,
                });
            }
            state.skips.push(skip);
            Ok(())
        }

        fn process(&mut self, input: Option<ProcessInput<'_>>) -> ProcessOutput {
            let mut state = self.state();
            match input {
                Some(input) => {
                    assert!(!same_fd(input.buffer, input.output));
                    state.inputs.push((input.len, input.output_id));
                    state.script.pop_front().unwrap_or_default()
                }
                None => {
                    state.drained += 1;
                    state.script.pop_front().unwrap_or_else(|| ProcessOutput {
                        status: ProcessStatus::CodecError,
                        extended_error: ExtendedError::from_raw(1 << errors::H264_STREAM_END),
                        ..Default::default()
                    })
                }
            }
        }

        fn flush(&mut self) -> Result<(), EngineError> {
            self.state().flushes += 1;
            Ok(())
        }

        fn close(&mut self) {
            self.state().closed = true;
        }
    }

    fn stream(tag: &[u8; 4], width: u32, height: u32) -> StreamInfo {
        StreamInfo {
            tag: u32::from_le_bytes(*tag),
            codec: String::new(),
            width,
            height,
        }
    }

    fn packet(pts: f64) -> Packet {
        Packet {
            data: vec![0, 0, 0, 1, 0x65],
            pts: Some(pts),
            dts: None,
            duration: Some(0.04),
        }
    }

    fn output(outputs: &[usize], freed: &[usize]) -> ProcessOutput {
        ProcessOutput {
            outputs: outputs.iter().copied().collect(),
            freed: freed.iter().copied().collect(),
            active_region: Rectangle::new(32, 24, 320, 240),
            ..Default::default()
        }
    }

    struct Fixture {
        dev: MockDevice,
        engine: MockEngine,
        provider: DumbAllocator<MockDevice>,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dev = MockDevice::new();
            Fixture {
                provider: DumbAllocator(dev.clone()),
                engine: MockEngine::default(),
                dev,
            }
        }

        fn decoder(&mut self, stream: &StreamInfo) -> Result<DceDecoder<MockEngine, MockDevice>, DecoderError> {
            DceDecoder::create(stream, self.engine.clone(), self.dev.clone(), &mut self.provider, 3)
        }
    }

    #[test]
    fn create_allocates_pool() {
        let mut fx = Fixture::new();
        let dec = fx.decoder(&stream(b"avc1", 320, 240)).unwrap();
        assert_eq!(dec.codec(), Codec::H264);
        assert_eq!(dec.buffers().len(), 48);
        assert!(dec.buffers().iter().enumerate().all(|(i, b)| b.index() == i && b.is_available()));

        let engine = fx.engine.state();
        let config = engine.config.unwrap();
        assert_eq!((config.geometry.width, config.geometry.height), (384, 336));
        assert!(!config.late_acquire);
        assert_eq!(engine.skips, vec![FrameSkip::None]);
        // the input buffer
        assert_eq!(engine.locked.len(), 1);
        drop(engine);
        assert!(fx.dev.calls().contains(&Call::CreateDumb {
            width: 384,
            height: 336,
            bpp: 8
        }));
    }

    #[test]
    fn unsupported_codec() {
        let mut fx = Fixture::new();
        let err = fx.decoder(&stream(b"hev1", 1920, 1080)).unwrap_err();
        assert!(matches!(err, DecoderError::UnsupportedCodec { .. }));
        assert!(fx.engine.state().config.is_none());
        assert!(fx.dev.calls().is_empty());
    }

    #[test]
    fn failed_create_tears_down() {
        let mut fx = Fixture::new();
        fx.engine.state().fail_control = true;
        let err = fx.decoder(&stream(b"XVID", 640, 480)).unwrap_err();
        assert!(matches!(err, DecoderError::Engine(EngineError::Control { .. })));
        assert!(fx.engine.state().closed);
        assert!(fx.dev.calls().is_empty());

        let mut fx = Fixture::new();
        fx.dev.state().fail_dumb_map = true;
        assert!(matches!(
            fx.decoder(&stream(b"XVID", 640, 480)),
            Err(DecoderError::Buffer(_))
        ));
        let calls = fx.dev.calls();
        let created = calls.iter().filter(|c| matches!(c, Call::CreateDumb { .. })).count();
        let destroyed = calls.iter().filter(|c| matches!(c, Call::DestroyDumb(_))).count();
        assert_eq!(created, destroyed);
        assert!(fx.engine.state().locked.is_empty());
    }

    #[test]
    fn frames_come_out_in_presentation_order() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"H264", 320, 240)).unwrap();

        fx.engine.push(output(&[], &[]));
        assert!(dec.decode_packet(&packet(0.08)).unwrap().is_none());
        assert!(!dec.buffers()[0].is_free());

        fx.engine.push(output(&[0], &[]));
        let frame = dec.decode_packet(&packet(0.0)).unwrap().unwrap();
        assert_eq!(frame.pts, Some(0.0));
        assert_eq!(frame.duration, Some(0.04));
        assert_eq!(frame.crop, Rectangle::new(32, 24, 320, 240));
        let buffer = frame.buffer().unwrap();
        assert_eq!(buffer.index(), 0);
        assert!(buffer.is_locked());

        // buffer 0 stays with the codec as reference, 1 is released
        fx.engine.push(output(&[1], &[1]));
        let frame = dec.decode_packet(&packet(0.04)).unwrap().unwrap();
        assert_eq!(frame.pts, Some(0.04));
        assert!(dec.buffers()[1].is_free());
        assert_eq!(fx.engine.state().inputs, vec![(5, 0), (5, 1), (5, 2)]);
    }

    #[test]
    fn exhausted_pool_asks_to_retry() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"mpg2", 720, 576)).unwrap();
        for buffer in dec.buffers() {
            buffer.set_locked(true);
        }
        assert!(matches!(dec.decode_packet(&packet(0.0)), Err(DecoderError::Again)));
        assert!(!dec.is_forced_eof());
        assert!(fx.engine.state().inputs.is_empty());

        dec.buffers()[7].set_locked(false);
        fx.engine.push(output(&[], &[]));
        dec.decode_packet(&packet(0.0)).unwrap();
        assert_eq!(fx.engine.state().inputs, vec![(5, 7)]);
    }

    #[test]
    fn fatal_error_forces_eof() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"WVC1", 1280, 720)).unwrap();
        fx.engine.push(ProcessOutput {
            status: ProcessStatus::CodecError,
            extended_error: ExtendedError::from_raw(1 << 15 | 1 << 22),
            ..Default::default()
        });
        match dec.decode_packet(&packet(0.0)) {
            Err(DecoderError::Fatal { description, .. }) => {
                assert_eq!(description, "XDM_FATALERROR ERR_PICHDR")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(dec.control(DecoderControl::CheckForcedEof), DecoderReply::ForcedEof(true));
        assert!(dec.buffers()[0].is_available());
        // only the input buffer stays pinned
        assert_eq!(fx.engine.state().locked.len(), 1);
    }

    #[test]
    fn benign_error_keeps_decoding() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"avc1", 320, 240)).unwrap();
        fx.engine.push(ProcessOutput {
            status: ProcessStatus::CodecError,
            extended_error: ExtendedError::from_raw(1 << 5 | 1 << 12),
            outputs: smallvec![0],
            ..Default::default()
        });
        assert!(dec.decode_packet(&packet(0.0)).unwrap().is_some());
        assert!(!dec.is_forced_eof());

        fx.engine.push(ProcessOutput {
            status: ProcessStatus::IpcFailure,
            ..Default::default()
        });
        assert!(matches!(
            dec.decode_packet(&packet(0.04)),
            Err(DecoderError::ProcessFailed(ProcessStatus::IpcFailure))
        ));
        assert!(dec.is_forced_eof());
    }

    #[test]
    fn reset_flushes_once() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"avc1", 320, 240)).unwrap();
        dec.reset(&mut fx.provider);
        assert_eq!(fx.engine.state().flushes, 0);

        fx.engine.push(output(&[0], &[]));
        let frame = dec.decode_packet(&packet(0.0)).unwrap().unwrap();
        fx.engine.push(output(&[], &[]));
        dec.decode_packet(&packet(0.04)).unwrap();
        frame.buffer().unwrap().acquire_display();
        dec.control(DecoderControl::SetFramedrop(FrameDrop::HrSeek));

        // one drained frame releasing both buffers, then the end of stream
        fx.engine.push(output(&[], &[0, 1]));
        dec.reset(&mut fx.provider);
        {
            let engine = fx.engine.state();
            assert_eq!(engine.flushes, 1);
            assert_eq!(engine.drained, 2);
            assert_eq!(engine.locked.len(), 1);
        }
        assert!(dec.buffers().iter().all(|b| b.is_available() && b.ref_count() == 0));

        dec.reset(&mut fx.provider);
        assert_eq!(fx.engine.state().flushes, 1);

        fx.engine.push(output(&[], &[]));
        dec.decode_packet(&packet(1.0)).unwrap();
        assert_eq!(fx.engine.state().skips.last(), Some(&FrameSkip::None));
    }

    #[test]
    fn framedrop_maps_to_frame_skip() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"DIVX", 640, 480)).unwrap();
        assert_eq!(dec.control(DecoderControl::GetHwdec), DecoderReply::Hwdec(None));
        assert_eq!(dec.control(DecoderControl::Reinit), DecoderReply::Unknown);
        dec.control(DecoderControl::SetFramedrop(FrameDrop::from_flags(1)));
        dec.decode_packet(&packet(0.0)).unwrap();
        dec.control(DecoderControl::SetFramedrop(FrameDrop::from_flags(2)));
        dec.decode_packet(&packet(0.04)).unwrap();
        assert_eq!(
            fx.engine.state().skips,
            vec![FrameSkip::None, FrameSkip::NonReference, FrameSkip::Intra]
        );
    }

    #[test]
    fn pin_protocol() {
        let mut fx = Fixture::new();
        let mut dec = fx.decoder(&stream(b"mpg1", 352, 288)).unwrap();
        assert!(matches!(dec.process(DecoderInput::Eof), DecoderOutput::Eof));
        assert!(matches!(
            dec.process(DecoderInput::Packet(Packet::default())),
            DecoderOutput::Failed(DecoderError::EmptyPacket)
        ));
        assert!(matches!(
            dec.process(DecoderInput::Packet(packet(0.0))),
            DecoderOutput::Progress
        ));
        fx.engine.push(output(&[0], &[]));
        assert!(matches!(
            dec.process(DecoderInput::Packet(packet(0.04))),
            DecoderOutput::Frame(_)
        ));
        let huge = Packet {
            data: vec![0; 352 * 288 + 1],
            ..packet(0.08)
        };
        assert!(matches!(
            dec.process(DecoderInput::Packet(huge)),
            DecoderOutput::Failed(DecoderError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn destroy_releases_everything() {
        let mut fx = Fixture::new();
        let dec = fx.decoder(&stream(b"WMV3", 640, 480)).unwrap();
        let buffers: Vec<BufferRef> = dec.buffers().to_vec();
        dec.destroy(&mut fx.provider);

        assert!(buffers.iter().all(|b| !b.is_valid()));
        let engine = fx.engine.state();
        assert!(engine.closed);
        assert!(engine.locked.is_empty());
        drop(engine);
        let calls = fx.dev.calls();
        let created = calls.iter().filter(|c| matches!(c, Call::CreateDumb { .. })).count();
        let destroyed = calls.iter().filter(|c| matches!(c, Call::DestroyDumb(_))).count();
        assert_eq!(created, 1 + 32);
        assert_eq!(created, destroyed);
    }
}
