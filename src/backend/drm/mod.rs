//! DRM/KMS plumbing used by the video output
//!
//! Everything that talks to the kernel goes through the [`KmsDevice`] trait, which exposes the
//! small set of ioctls the page-flip pipeline needs using raw 32-bit object ids.
//! [`DrmDeviceFd`] implements it on top of an opened `/dev/dri/card*` node.
//!
//! On top of that this module provides:
//!
//! - [`DrmObject`], a cached view of a crtc, connector or plane and its properties,
//!   used to build [`AtomicRequest`]s by property name
//! - [`AtomicContext`], which resolves the crtc, connector and the draw, video and osd planes
//!   and saves/restores the display state that was active before we took over
//! - [`DrmState`], the session a video output runs on (connector, mode and crtc selection,
//!   crtc acquisition, page-flip waiting and presentation feedback)
//! - [`HdrBlob`], the `HDR_OUTPUT_METADATA` kernel blob

use std::io;
use std::os::unix::io::OwnedFd;
use std::path::PathBuf;
use std::time::Duration;

use drm::control::{AtomicCommitFlags, Mode};
use drm_fourcc::DrmFourcc;

use crate::backend::allocator::MappedBuffer;
use crate::utils::Rectangle;

mod atomic;
mod device;
mod error;
mod hdr;
mod object;
mod options;
mod present;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use self::atomic::{AtomicContext, PlaneState, PlaneType, SavedState};
pub use self::device::DrmDeviceFd;
pub use self::error::{AccessError, Error};
pub use self::hdr::{HdrBlob, HdrOutputMetadata, HDR_OUTPUT_METADATA_SIZE};
pub use self::object::{AtomicRequest, DrmObject, Property};
pub use self::options::{DrmOptions, ModeSelection, OptionError, PlaneSelection};
pub use self::present::{PresentSync, VsyncInfo};
pub use self::state::DrmState;

/// Type of a kernel mode object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A crtc
    Crtc,
    /// A connector
    Connector,
    /// A plane
    Plane,
}

impl ObjectType {
    /// The `DRM_MODE_OBJECT_*` value of this type
    pub const fn raw(self) -> u32 {
        match self {
            ObjectType::Crtc => 0xcccc_cccc,
            ObjectType::Connector => 0xc0c0_c0c0,
            ObjectType::Plane => 0xeeee_eeee,
        }
    }
}

/// Description of a single property of a mode object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property id
    pub id: u32,
    /// Property name as reported by the kernel
    pub name: String,
    /// Whether the property is read-only
    pub immutable: bool,
}

/// Crtcs and connectors of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Crtc ids, in kernel order. The position defines the crtc index.
    pub crtcs: Vec<u32>,
    /// Connector ids
    pub connectors: Vec<u32>,
}

/// A plane and the crtcs it can be used with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Plane id
    pub id: u32,
    /// Bitmask of crtc indices (into [`Resources::crtcs`]) this plane can be attached to
    pub possible_crtcs: u32,
}

/// A connector and its current state
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorInfo {
    /// Connector id
    pub id: u32,
    /// Name in the form `<interface>-<index>`, e.g. `HDMI-A-1`
    pub name: String,
    /// Whether a sink is attached
    pub connected: bool,
    /// Modes supported by the sink, preferred mode first where the kernel reports one
    pub modes: Vec<Mode>,
    /// The crtc currently driving this connector
    pub crtc: Option<u32>,
    /// Bitmask of crtc indices able to drive this connector
    pub possible_crtcs: u32,
}

/// A freshly created dumb buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbAllocation {
    /// GEM handle
    pub handle: u32,
    /// Pitch of a line in bytes
    pub pitch: u32,
    /// Total size in bytes
    pub size: u64,
}

/// Arguments of an `ADDFB2` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferLayout {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: DrmFourcc,
    /// GEM handle per plane
    pub handles: [u32; 4],
    /// Pitch per plane
    pub pitches: [u32; 4],
    /// Offset per plane
    pub offsets: [u32; 4],
}

/// A page-flip completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    /// Crtc that flipped
    pub crtc: u32,
    /// Vblank sequence number of the flip
    pub sequence: u32,
    /// Monotonic timestamp of the flip
    pub time: Duration,
}

/// The kernel mode-setting interface used by this crate
///
/// All ids are raw kernel object ids. A zero id never names an object.
pub trait KmsDevice {
    /// Path of the device node, used for error reporting
    fn dev_path(&self) -> Option<PathBuf> {
        None
    }

    /// Crtcs and connectors of the device
    fn resources(&self) -> io::Result<Resources>;
    /// All planes of the device
    fn planes(&self) -> io::Result<Vec<PlaneInfo>>;
    /// Information about a connector
    fn connector(&self, id: u32) -> io::Result<ConnectorInfo>;
    /// The mode currently programmed on a crtc
    fn crtc_mode(&self, crtc: u32) -> io::Result<Option<Mode>>;
    /// Properties of a mode object together with their current values
    fn properties(&self, object: u32, kind: ObjectType) -> io::Result<Vec<(PropertyInfo, u64)>>;

    /// Creates a property blob from raw bytes
    fn create_blob(&self, data: &[u8]) -> io::Result<u32>;
    /// Creates a property blob describing a display mode
    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u32>;
    /// Destroys a property blob
    fn destroy_blob(&self, blob: u32) -> io::Result<()>;
    /// Commits an atomic request
    fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()>;

    /// `DRM_IOCTL_MODE_CREATE_DUMB`
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation>;
    /// `DRM_IOCTL_MODE_MAP_DUMB` followed by a shared read/write mapping of `size` bytes
    fn map_dumb(&self, handle: u32, size: usize) -> io::Result<MappedBuffer>;
    /// `DRM_IOCTL_MODE_DESTROY_DUMB`
    fn destroy_dumb(&self, handle: u32) -> io::Result<()>;
    /// `DRM_IOCTL_PRIME_HANDLE_TO_FD`
    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd>;
    /// `DRM_IOCTL_MODE_ADDFB2`, returns the framebuffer id
    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<u32>;
    /// `DRM_IOCTL_MODE_RMFB`
    fn remove_framebuffer(&self, fb: u32) -> io::Result<()>;

    /// `DRM_IOCTL_MODE_SETPLANE`; `src` is given in whole pixels
    fn update_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rectangle, src: Rectangle) -> io::Result<()>;
    /// `DRM_IOCTL_MODE_PAGE_FLIP` requesting a completion event
    fn queue_page_flip(&self, crtc: u32, fb: u32) -> io::Result<()>;
    /// Blocks until the next page-flip completion event is read from the device
    fn wait_page_flip(&self) -> io::Result<FlipEvent>;
}

pub(crate) fn access_error<'a, D: KmsDevice + ?Sized>(
    dev: &'a D,
    errmsg: &'static str,
) -> impl FnOnce(io::Error) -> Error + 'a {
    move |source| {
        Error::Access(AccessError {
            errmsg,
            dev: dev.dev_path(),
            source,
        })
    }
}
