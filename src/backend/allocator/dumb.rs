//! Module for [DumbBuffer](https://01.org/linuxgraphics/gfx-docs/drm/gpu/drm-kms.html#dumb-buffer-objects) buffers
//!
//! Dumb buffers are CPU-mappable, linear kernel allocations. The video output uses them
//! for the primary and osd layers (ARGB) and for software decoded frames (NV12), the decoder
//! for its bitstream input buffer.

use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};

use scopeguard::ScopeGuard;
use tracing::{trace, warn};

use super::{Buffer, BufferError, Fourcc, MappedBuffer};
use crate::backend::drm::{AccessError, FramebufferLayout, KmsDevice};

fn access<'a, D: KmsDevice + ?Sized>(
    dev: &'a D,
    errmsg: &'static str,
) -> impl FnOnce(std::io::Error) -> BufferError + 'a {
    move |source| {
        BufferError::Access(AccessError {
            errmsg,
            dev: dev.dev_path(),
            source,
        })
    }
}

/// A raw dumb buffer: GEM handle, optional CPU mapping and optional dma-buf export
///
/// The zero value owns nothing, destroying it issues no kernel call.
#[derive(Debug, Default)]
pub struct DumbBuffer {
    handle: u32,
    pitch: u32,
    size: u64,
    map: Option<MappedBuffer>,
    dma_buf: Option<OwnedFd>,
}

impl DumbBuffer {
    /// Allocates a dumb buffer of `width` x `height` pixels of `bpp` bits
    pub fn allocate<D: KmsDevice + ?Sized>(dev: &D, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, BufferError> {
        let alloc = dev
            .create_dumb(width, height, bpp)
            .map_err(access(dev, "Cannot create dumb buffer"))?;
        trace!(handle = alloc.handle, size = alloc.size, "Created dumb buffer");
        Ok(DumbBuffer {
            handle: alloc.handle,
            pitch: alloc.pitch,
            size: alloc.size,
            map: None,
            dma_buf: None,
        })
    }

    /// Maps the whole buffer into our address space and clears it
    pub fn map<D: KmsDevice + ?Sized>(&mut self, dev: &D) -> Result<(), BufferError> {
        if self.map.is_none() {
            let mut map = dev
                .map_dumb(self.handle, self.size as usize)
                .map_err(access(dev, "Cannot map dumb buffer"))?;
            map.fill(0);
            self.map = Some(map);
        }
        Ok(())
    }

    /// Exports the buffer as a dma-buf
    pub fn export<D: KmsDevice + ?Sized>(&mut self, dev: &D) -> Result<(), BufferError> {
        if self.dma_buf.is_none() {
            let fd = dev
                .export_prime(self.handle)
                .map_err(access(dev, "Cannot export a dma-buf"))?;
            self.dma_buf = Some(fd);
        }
        Ok(())
    }

    /// Drops the CPU mapping
    pub fn unmap(&mut self) {
        self.map = None;
    }

    /// Closes the dma-buf and frees the GEM handle
    ///
    /// Calling this more than once, or on a buffer that was never allocated, is a no-op.
    pub fn destroy<D: KmsDevice + ?Sized>(&mut self, dev: &D) {
        self.unmap();
        self.dma_buf = None;
        if self.handle != 0 {
            if let Err(err) = dev.destroy_dumb(self.handle) {
                warn!(handle = self.handle, "Failed to destroy dumb buffer: {}", err);
            }
            self.handle = 0;
        }
        self.size = 0;
        self.pitch = 0;
    }

    /// GEM handle, zero if not allocated
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Pitch reported by the kernel
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The dma-buf, if exported
    pub fn dma_buf(&self) -> Option<BorrowedFd<'_>> {
        self.dma_buf.as_ref().map(|fd| fd.as_fd())
    }

    /// The CPU mapping, if mapped
    pub fn mapping(&self) -> Option<&[u8]> {
        self.map.as_deref()
    }

    /// The CPU mapping, if mapped
    pub fn mapping_mut(&mut self) -> Option<&mut [u8]> {
        self.map.as_deref_mut()
    }
}

/// A dumb buffer registered as a DRM framebuffer
///
/// Supports `ARGB8888` (packed, kernel pitch) and `NV12`. NV12 buffers are allocated as a
/// byte buffer one pixel wide and `w * h * 3 / 2` lines high, with the chroma plane following
/// the luma plane at offset `w * h` and both planes using a pitch of `w`.
#[derive(Debug, Default)]
pub struct DumbFramebuffer {
    buffer: DumbBuffer,
    fb_id: u32,
    width: u32,
    height: u32,
    stride: u32,
    format: Option<Fourcc>,
}

impl DumbFramebuffer {
    /// Allocates, registers, maps, clears and exports a new framebuffer
    ///
    /// On failure everything created so far is torn down again.
    #[profiling::function]
    pub fn new<D: KmsDevice + ?Sized>(dev: &D, width: u32, height: u32, format: Fourcc) -> Result<DumbFramebuffer, BufferError> {
        if width == 0 || height == 0 || width > 16384 || height > 16384 {
            return Err(BufferError::InvalidSize(width, height));
        }
        let (alloc_w, alloc_h, bpp) = match format {
            Fourcc::Argb8888 => (width, height, 32),
            Fourcc::Nv12 => (1, width * height * 3 / 2, 8),
            format => return Err(BufferError::UnsupportedFormat(format)),
        };

        let mut fb = scopeguard::guard(
            DumbFramebuffer {
                width,
                height,
                format: Some(format),
                ..Default::default()
            },
            |mut fb| fb.destroy(dev),
        );

        fb.buffer = DumbBuffer::allocate(dev, alloc_w, alloc_h, bpp)?;

        let handle = fb.buffer.handle();
        let mut layout = FramebufferLayout {
            width,
            height,
            format,
            handles: [handle, 0, 0, 0],
            pitches: [0; 4],
            offsets: [0; 4],
        };
        if format == Fourcc::Nv12 {
            fb.stride = width;
            layout.pitches = [width, width, 0, 0];
            layout.handles[1] = handle;
            layout.offsets[1] = width * height;
        } else {
            fb.stride = fb.buffer.pitch();
            layout.pitches[0] = fb.stride;
        }

        fb.fb_id = dev
            .add_framebuffer(&layout)
            .map_err(access(dev, "Cannot create framebuffer"))?;
        fb.buffer.map(dev)?;
        fb.buffer.export(dev)?;

        trace!(fb = fb.fb_id, width, height, ?format, "Created framebuffer");
        Ok(ScopeGuard::into_inner(fb))
    }

    /// Tears the framebuffer down: unmap, remove the framebuffer, close the dma-buf, free the dumb buffer
    ///
    /// Every step is skipped if its resource does not exist, so this is safe on partially
    /// constructed or already destroyed framebuffers.
    pub fn destroy<D: KmsDevice + ?Sized>(&mut self, dev: &D) {
        self.buffer.unmap();
        if self.fb_id != 0 {
            if let Err(err) = dev.remove_framebuffer(self.fb_id) {
                warn!(fb = self.fb_id, "Failed to remove framebuffer: {}", err);
            }
            self.fb_id = 0;
        }
        self.buffer.destroy(dev);
    }

    /// DRM framebuffer id, zero once destroyed
    pub fn id(&self) -> u32 {
        self.fb_id
    }

    /// Line stride of the first plane in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The underlying dumb buffer
    pub fn buffer(&self) -> &DumbBuffer {
        &self.buffer
    }

    /// CPU mapping of the whole buffer
    pub fn mapping_mut(&mut self) -> Option<&mut [u8]> {
        self.buffer.mapping_mut()
    }
}

impl Buffer for DumbFramebuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> Option<Fourcc> {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::drm::testing::{Call, MockDevice};

    #[test]
    fn nv12_layout() {
        let dev = MockDevice::new();
        let fb = DumbFramebuffer::new(&dev, 720, 576, Fourcc::Nv12).unwrap();
        let calls = dev.calls();
        assert_eq!(
            calls[0],
            Call::CreateDumb {
                width: 1,
                height: 720 * 576 * 3 / 2,
                bpp: 8
            }
        );
        let Call::AddFramebuffer(id, layout) = calls[1] else {
            panic!("expected ADDFB2, got {:?}", calls[1]);
        };
        assert_eq!(id, fb.id());
        assert_eq!(layout.pitches, [720, 720, 0, 0]);
        assert_eq!(layout.offsets, [0, 720 * 576, 0, 0]);
        assert_eq!(layout.handles[0], layout.handles[1]);
        assert_eq!(fb.stride(), 720);
        assert!(matches!(calls[2], Call::MapDumb(_)));
        assert!(matches!(calls[3], Call::ExportPrime(_)));
        assert!(fb.buffer().mapping().unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn argb_uses_kernel_pitch() {
        let dev = MockDevice::new();
        let fb = DumbFramebuffer::new(&dev, 960, 540, Fourcc::Argb8888).unwrap();
        assert_eq!(fb.stride(), 960 * 4);
        assert_eq!(fb.size(), (960, 540));
        assert_eq!(
            dev.calls()[0],
            Call::CreateDumb {
                width: 960,
                height: 540,
                bpp: 32
            }
        );
    }

    #[test]
    fn teardown_order() {
        let dev = MockDevice::new();
        let mut fb = DumbFramebuffer::new(&dev, 64, 64, Fourcc::Argb8888).unwrap();
        let (id, handle) = (fb.id(), fb.buffer().handle());
        dev.clear_calls();
        fb.destroy(&dev);
        assert_eq!(dev.calls(), vec![Call::RemoveFramebuffer(id), Call::DestroyDumb(handle)]);
        assert!(fb.buffer().dma_buf().is_none());
        assert!(fb.buffer().mapping().is_none());

        dev.clear_calls();
        fb.destroy(&dev);
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn destroy_zeroed_is_noop() {
        let dev = MockDevice::new();
        let mut fb = DumbFramebuffer::default();
        fb.destroy(&dev);
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn failed_setup_tears_down() {
        let dev = MockDevice::new();
        dev.state().fail_dumb_map = true;
        match DumbFramebuffer::new(&dev, 64, 64, Fourcc::Nv12) {
            Err(BufferError::Access(err)) => assert_eq!(err.errmsg, "Cannot map dumb buffer"),
            other => panic!("unexpected {:?}", other.map(|fb| fb.id())),
        }
        let calls = dev.calls();
        let Call::AddFramebuffer(id, _) = calls[1] else {
            panic!("expected ADDFB2, got {:?}", calls[1]);
        };
        assert_eq!(calls[3], Call::RemoveFramebuffer(id));
        assert!(matches!(calls[4], Call::DestroyDumb(_)));
    }

    #[test]
    fn rejects_unsupported_format() {
        let dev = MockDevice::new();
        assert!(matches!(
            DumbFramebuffer::new(&dev, 64, 64, Fourcc::Yuyv),
            Err(BufferError::UnsupportedFormat(Fourcc::Yuyv))
        ));
        assert!(dev.calls().is_empty());
    }
}
