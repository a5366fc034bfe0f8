//! Interface to the codec engine running on the IVA-HD coprocessor
//!
//! The engine is a remote process reached through the vendor's rpc library. Buffers are passed
//! as dma-buf file descriptors which have to be locked (pinned for the remote side) while the
//! engine may access them. Output buffers are identified by their pool index.

use std::fmt;
use std::os::unix::io::BorrowedFd;

use smallvec::SmallVec;

use super::{Codec, ExtendedError, FrameGeometry};
use crate::utils::Rectangle;

/// Errors of engine calls
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine or codec server could not be opened
    #[error("Failed to open codec engine {0}")]
    Open(&'static str),
    /// A control call returned an error code
    #[error("{call} failed: {code}")]
    Control {
        /// Name of the call
        call: &'static str,
        /// Returned error code
        code: i32,
    },
    /// The engine was used after closing it
    #[error("Codec engine is closed")]
    Closed,
}

/// Creation parameters of a codec instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Codec to create
    pub codec: Codec,
    /// Buffer layout
    pub geometry: FrameGeometry,
    /// Acquire output buffers late
    pub late_acquire: bool,
}

impl EngineConfig {
    /// Parameters for decoding `codec` into buffers of `geometry`
    pub fn new(codec: Codec, geometry: FrameGeometry) -> EngineConfig {
        EngineConfig {
            codec,
            geometry,
            late_acquire: codec.late_acquire(),
        }
    }
}

/// Which frames the codec may skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSkip {
    /// Decode everything
    #[default]
    None,
    /// Skip frames not used as reference
    NonReference,
    /// Skip intra frames, used while seeking precisely
    Intra,
}

/// Input of a process call
#[derive(Debug)]
pub struct ProcessInput<'a> {
    /// The input buffer holding the packet
    pub buffer: BorrowedFd<'a>,
    /// Bytes of the packet
    pub len: usize,
    /// Output buffer the frame is decoded into
    pub output: BorrowedFd<'a>,
    /// Pool index of the output buffer
    pub output_id: usize,
}

/// Return status of a process call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Success
    Ok,
    /// The codec reported an error, see [`ProcessOutput::extended_error`]
    CodecError,
    /// The call is not supported
    Unsupported,
    /// The rpc call to the coprocessor failed
    IpcFailure,
    /// The arguments were rejected
    InvalidInput,
}

/// How a decoded picture is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// A progressive frame
    #[default]
    Progressive,
    /// Only the top field
    TopField,
    /// Only the bottom field
    BottomField,
}

/// Result of a process call
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Status of the call
    pub status: ProcessStatus,
    /// Error bits, valid for [`ProcessStatus::CodecError`]
    pub extended_error: ExtendedError,
    /// Pool indices of buffers the codec does not reference anymore
    pub freed: SmallVec<[usize; 4]>,
    /// Pool indices of buffers ready for display, in display order
    pub outputs: SmallVec<[usize; 4]>,
    /// Visible part of the first output buffer
    pub active_region: Rectangle,
    /// Layout of the first output buffer
    pub content: ContentType,
    /// The first field of the output is to be repeated
    pub repeat_first_field: bool,
    /// The codec still uses output buffers it received
    pub buffers_in_use: bool,
}

impl Default for ProcessOutput {
    fn default() -> Self {
        ProcessOutput {
            status: ProcessStatus::Ok,
            extended_error: ExtendedError::empty(),
            freed: SmallVec::new(),
            outputs: SmallVec::new(),
            active_region: Rectangle::default(),
            content: ContentType::Progressive,
            repeat_first_field: false,
            buffers_in_use: false,
        }
    }
}

/// A codec instance on the engine
pub trait CodecEngine: fmt::Debug {
    /// Creates the codec instance
    fn open(&mut self, config: &EngineConfig) -> Result<(), EngineError>;
    /// Pins a buffer for the remote side
    fn lock_buffer(&mut self, buffer: BorrowedFd<'_>);
    /// Unpins a buffer
    fn unlock_buffer(&mut self, buffer: BorrowedFd<'_>);
    /// Applies the frame skip mode and refreshes the buffer requirements
    fn set_frame_skip(&mut self, skip: FrameSkip) -> Result<(), EngineError>;
    /// Decodes one packet, or drains one frame if `input` is `None`
    fn process(&mut self, input: Option<ProcessInput<'_>>) -> ProcessOutput;
    /// Switches the codec into flushing mode
    fn flush(&mut self) -> Result<(), EngineError>;
    /// Deletes the codec instance
    fn close(&mut self);
}
