use std::fs::OpenOptions;
use std::io;
use std::num::NonZeroU32;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drm::control::{
    self, atomic::AtomicModeReq, connector, crtc, framebuffer, plane, property, AtomicCommitFlags,
    CrtcListFilter, Device as ControlDevice, Event, Mode, PageFlipFlags, ResourceHandles,
};
use drm::Device as BasicDevice;
use tracing::{debug, warn};

use super::{
    AtomicRequest, ConnectorInfo, DumbAllocation, FlipEvent, FramebufferLayout, KmsDevice, ObjectType,
    PlaneInfo, PropertyInfo, Resources,
};
use crate::backend::allocator::MappedBuffer;
use crate::utils::Rectangle;

#[derive(Debug)]
struct CardNode {
    fd: OwnedFd,
    path: Option<PathBuf>,
    master: bool,
}

impl Drop for CardNode {
    fn drop(&mut self) {
        debug!(path = ?self.path, "Closing card node");
        if self.master {
            if let Err(err) = self.release_master_lock() {
                warn!("Could not hand back modesetting rights: {}", err);
            }
        }
    }
}

impl AsFd for CardNode {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
impl BasicDevice for CardNode {}
impl ControlDevice for CardNode {}

/// A DRM card node driven through the kernel's mode-setting ioctls
///
/// Clones share the open node. Modesetting rights are taken when the node is opened and
/// handed back once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct DrmDeviceFd(Arc<CardNode>);

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.fd.as_fd()
    }
}

impl AsRawFd for DrmDeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.fd.as_raw_fd()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

impl DrmDeviceFd {
    /// Drives an already opened card node
    ///
    /// The node's path is looked up through `/proc` for error messages.
    pub fn new(fd: OwnedFd) -> DrmDeviceFd {
        let path = std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd())).ok();
        Self::with_path(fd, path)
    }

    /// Opens the card node at `path`, e.g. `/dev/dri/card0`
    pub fn open(path: impl AsRef<Path>) -> io::Result<DrmDeviceFd> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        Ok(Self::with_path(file.into(), Some(path.to_owned())))
    }

    fn with_path(fd: OwnedFd, path: Option<PathBuf>) -> DrmDeviceFd {
        let mut node = CardNode { fd, path, master: false };
        // atomic commits with ALLOW_MODESET need master outside of a compositor
        match node.acquire_master_lock() {
            Ok(()) => node.master = true,
            Err(err) => warn!(path = ?node.path, "Not drm master, modesets may fail: {}", err),
        }
        DrmDeviceFd(Arc::new(node))
    }

    /// Whether modesetting rights were granted for this node
    pub fn is_master(&self) -> bool {
        self.0.master
    }
}

fn handle<T: From<NonZeroU32>>(id: u32) -> io::Result<T> {
    control::from_u32(id).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
}

fn crtc_mask(res: &ResourceHandles, filter: CrtcListFilter) -> u32 {
    let allowed = res.filter_crtcs(filter);
    res.crtcs()
        .iter()
        .enumerate()
        .filter(|(_, crtc)| allowed.contains(crtc))
        .fold(0, |mask, (idx, _)| mask | (1 << idx))
}

impl KmsDevice for DrmDeviceFd {
    fn dev_path(&self) -> Option<PathBuf> {
        self.0.path.clone()
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = self.resource_handles()?;
        Ok(Resources {
            crtcs: res.crtcs().iter().map(|&crtc| crtc.into()).collect(),
            connectors: res.connectors().iter().map(|&conn| conn.into()).collect(),
        })
    }

    fn planes(&self) -> io::Result<Vec<PlaneInfo>> {
        let res = self.resource_handles()?;
        self.plane_handles()?
            .into_iter()
            .map(|plane| {
                let info = self.get_plane(plane)?;
                Ok(PlaneInfo {
                    id: plane.into(),
                    possible_crtcs: crtc_mask(&res, info.possible_crtcs()),
                })
            })
            .collect()
    }

    fn connector(&self, id: u32) -> io::Result<ConnectorInfo> {
        let res = self.resource_handles()?;
        let info = self.get_connector(handle::<connector::Handle>(id)?, false)?;

        let crtc = match info.current_encoder() {
            Some(encoder) => self.get_encoder(encoder)?.crtc().map(u32::from),
            None => None,
        };
        let mut possible_crtcs = 0;
        for encoder in info.encoders() {
            match self.get_encoder(*encoder) {
                Ok(encoder) => possible_crtcs |= crtc_mask(&res, encoder.possible_crtcs()),
                Err(err) => debug!(connector = id, "Failed to query encoder: {}", err),
            }
        }

        Ok(ConnectorInfo {
            id,
            name: format!("{}-{}", info.interface().as_str(), info.interface_id()),
            connected: info.state() == connector::State::Connected,
            modes: info.modes().to_vec(),
            crtc,
            possible_crtcs,
        })
    }

    fn crtc_mode(&self, crtc: u32) -> io::Result<Option<Mode>> {
        Ok(self.get_crtc(handle::<crtc::Handle>(crtc)?)?.mode())
    }

    fn properties(&self, object: u32, kind: ObjectType) -> io::Result<Vec<(PropertyInfo, u64)>> {
        let props = match kind {
            ObjectType::Crtc => self.get_properties(handle::<crtc::Handle>(object)?)?,
            ObjectType::Connector => self.get_properties(handle::<connector::Handle>(object)?)?,
            ObjectType::Plane => self.get_properties(handle::<plane::Handle>(object)?)?,
        };
        let (handles, values) = props.as_props_and_values();
        handles
            .iter()
            .zip(values)
            .map(|(&prop, &value)| {
                let info = self.get_property(prop)?;
                Ok((
                    PropertyInfo {
                        id: prop.into(),
                        name: info.name().to_string_lossy().into_owned(),
                        immutable: !info.mutable(),
                    },
                    value,
                ))
            })
            .collect()
    }

    fn create_blob(&self, data: &[u8]) -> io::Result<u32> {
        let mut data = data.to_vec();
        Ok(drm_ffi::mode::create_property_blob(self.as_fd(), &mut data)?.blob_id)
    }

    fn create_mode_blob(&self, mode: &Mode) -> io::Result<u32> {
        match ControlDevice::create_property_blob(self, mode)? {
            property::Value::Blob(id) => Ok(id as u32),
            _ => Err(io::Error::from(io::ErrorKind::InvalidData)),
        }
    }

    fn destroy_blob(&self, blob: u32) -> io::Result<()> {
        self.destroy_property_blob(blob as u64)
    }

    fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for (object, prop, value) in request.iter() {
            req.add_raw_property(handle(object)?, handle::<property::Handle>(prop)?, value);
        }
        self.atomic_commit(flags, req)
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let dumb = drm_ffi::mode::dumbbuffer::create(self.as_fd(), width, height, bpp, 0)?;
        Ok(DumbAllocation {
            handle: dumb.handle,
            pitch: dumb.pitch,
            size: dumb.size,
        })
    }

    fn map_dumb(&self, handle: u32, size: usize) -> io::Result<MappedBuffer> {
        let map = drm_ffi::mode::dumbbuffer::map(self.as_fd(), handle, 0, 0)?;
        // SAFETY: the offset was handed out by the kernel for this buffer of `size` bytes
        unsafe { MappedBuffer::mmap(self.as_fd(), map.offset, size) }
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        drm_ffi::mode::dumbbuffer::destroy(self.as_fd(), handle).map(|_| ())
    }

    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd> {
        let prime = drm_ffi::gem::handle_to_fd(self.as_fd(), handle, (libc::O_CLOEXEC | libc::O_RDWR) as u32)?;
        // SAFETY: the kernel just handed us this descriptor
        Ok(unsafe { OwnedFd::from_raw_fd(prime.fd) })
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<u32> {
        let fb = drm_ffi::mode::add_fb2(
            self.as_fd(),
            layout.width,
            layout.height,
            layout.format as u32,
            &layout.handles,
            &layout.pitches,
            &layout.offsets,
            &[0; 4],
            0,
        )?;
        Ok(fb.fb_id)
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        self.destroy_framebuffer(handle::<framebuffer::Handle>(fb)?)
    }

    fn update_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rectangle, src: Rectangle) -> io::Result<()> {
        let fb = match fb {
            0 => None,
            fb => Some(handle::<framebuffer::Handle>(fb)?),
        };
        self.set_plane(
            handle::<plane::Handle>(plane)?,
            handle::<crtc::Handle>(crtc)?,
            fb,
            0,
            (dst.x, dst.y, dst.width as u32, dst.height as u32),
            (
                (src.x as u32) << 16,
                (src.y as u32) << 16,
                (src.width as u32) << 16,
                (src.height as u32) << 16,
            ),
        )
    }

    fn queue_page_flip(&self, crtc: u32, fb: u32) -> io::Result<()> {
        self.page_flip(
            handle::<crtc::Handle>(crtc)?,
            handle::<framebuffer::Handle>(fb)?,
            PageFlipFlags::EVENT,
            None,
        )
    }

    fn wait_page_flip(&self) -> io::Result<FlipEvent> {
        loop {
            for event in self.receive_events()? {
                if let Event::PageFlip(event) = event {
                    return Ok(FlipEvent {
                        crtc: event.crtc.into(),
                        sequence: event.frame,
                        time: event.duration,
                    });
                }
            }
        }
    }
}
