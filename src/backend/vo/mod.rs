//! The video output: draws decoded frames onto the drm planes and paces page flips
//!
//! Three planes are stacked on the crtc: the video plane at the bottom, the osd plane above
//! it and the draw plane on top, which scans out the (transparent) primary buffer.
//!
//! Every drawn frame is appended to a [`FrameQueue`]. [`VideoOutput::flip_page`] keeps at most
//! `swapchain_depth` frames queued: while there are more, it waits for the outstanding flip,
//! retires the frame that was shown and flips to the next one. When paused or showing a still
//! frame the queue is drained completely.
//!
//! ```no_run
//! use drm_omap::backend::drm::{DrmDeviceFd, DrmOptions};
//! use drm_omap::backend::video::{osd::NoOsd, DrawRequest, SoftwareScaler};
//! use drm_omap::backend::vo::VideoOutput;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dev = DrmDeviceFd::open("/dev/dri/card0")?;
//! let opts = DrmOptions::default().with_env_overrides()?;
//! let mut vo = VideoOutput::preinit(dev, opts, Box::new(NoOsd::default()), Box::new(SoftwareScaler::new()))?;
//! # let params = drm_omap::backend::video::ImageParams::new(drm_omap::backend::video::ImageFormat::Yuv420p, 1280, 720);
//! vo.reconfig(&params)?;
//! vo.draw_frame(&DrawRequest::default())?;
//! vo.flip_page()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, info_span, trace, warn};

use crate::backend::allocator::{Buffer, BufferError, BufferRef, DumbFramebuffer, FrameBuffer, Fourcc};
use crate::backend::color::ColorSpace;
use crate::backend::drm::{
    AtomicRequest, DrmObject, DrmOptions, DrmState, Error as DrmError, KmsDevice, VsyncInfo,
};
use crate::backend::video::{
    blit_modified, Image, ImageFormat, ImageParams, OsdRenderer, OsdResolution, ScaleError, Scaler,
    VideoFrame,
};
use crate::utils::{align_down, copy_plane, Rectangle};

use drm::control::AtomicCommitFlags;

pub mod geometry;
mod swapchain;

pub use self::swapchain::FrameQueue;

/// Errors of the video output
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The drm session failed
    #[error(transparent)]
    Drm(#[from] DrmError),
    /// A buffer could not be allocated
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The scaler failed
    #[error(transparent)]
    Scale(#[from] ScaleError),
    /// The crtc has no plane to show video on
    #[error("No video plane available")]
    NoVideoPlane,
    /// A frame was drawn before the output was configured
    #[error("Video output is not configured")]
    NotConfigured,
    /// A hardware frame was expected
    #[error("Frame does not carry a hardware buffer")]
    NotHardwareFrame,
}

/// Allocation of buffers the hardware decoder decodes into
pub trait BufferProvider {
    /// Allocates a buffer of `width` x `height` pixels
    fn alloc_buffer(&mut self, format: Fourcc, width: u32, height: u32) -> Result<BufferRef, BufferError>;
    /// Frees a buffer from [`BufferProvider::alloc_buffer`]
    fn release_buffer(&mut self, buffer: &BufferRef);
    /// Drops every queued frame still referencing provided buffers
    fn reset_display(&mut self) {}
}

/// Allocates dumb framebuffers on a device
#[derive(Debug, Clone)]
pub struct DumbAllocator<D: KmsDevice>(pub D);

impl<D: KmsDevice> BufferProvider for DumbAllocator<D> {
    fn alloc_buffer(&mut self, format: Fourcc, width: u32, height: u32) -> Result<BufferRef, BufferError> {
        Ok(FrameBuffer::new(DumbFramebuffer::new(&self.0, width, height, format)?))
    }

    fn release_buffer(&mut self, buffer: &BufferRef) {
        buffer.destroy(&self.0);
    }
}

/// Requests to [`VideoOutput::control`]
#[derive(Debug, Clone, PartialEq)]
pub enum VoControl {
    /// The zoom or pan changed, recompute the geometry
    SetPanscan,
    /// Drop all queued frames
    Reset,
    /// Playback paused
    Pause,
    /// Playback resumed
    Resume,
    /// Query the refresh rate
    GetDisplayFps,
    /// Query the screen size
    GetDisplayResolution,
    /// The colorspace of the stream changed
    SetHdrMetadata(ColorSpace),
}

/// Answers of [`VideoOutput::control`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlReply {
    /// The request was handled
    Done,
    /// Refresh rate in Hz
    DisplayFps(f64),
    /// Screen size in pixels
    DisplayResolution(u32, u32),
    /// The request is not supported
    NotImplemented,
}

/// A video output on a drm device
#[derive(Debug)]
pub struct VideoOutput<D: KmsDevice> {
    drm: DrmState<D>,
    hwdec: bool,
    swapchain_depth: usize,
    queue: FrameQueue,
    primary: Option<DumbFramebuffer>,
    osd_buf: Option<DumbFramebuffer>,
    bufs: Vec<BufferRef>,
    front_buf: usize,
    params: Option<ImageParams>,
    src: Rectangle,
    dst: Rectangle,
    osd_res: OsdResolution,
    cur_frame: Option<Image>,
    last_input: Option<Arc<VideoFrame>>,
    osd_changed: bool,
    want_redraw: bool,
    osd: Box<dyn OsdRenderer>,
    scaler: Box<dyn Scaler>,
    span: tracing::Span,
}

fn set_zorder(plane: &DrmObject, req: &mut AtomicRequest, value: u64) -> Result<(), DrmError> {
    // older vendor kernels name it zorder
    let name = if plane.has("zorder") { "zorder" } else { "zpos" };
    plane.set(req, name, value)
}

impl<D: KmsDevice> VideoOutput<D> {
    /// Opens the output on `dev`
    ///
    /// Takes over the crtc with a transparent primary buffer, allocates the osd buffer at half
    /// the screen size and stacks the planes.
    pub fn preinit(
        dev: D,
        opts: DrmOptions,
        osd: Box<dyn OsdRenderer>,
        scaler: Box<dyn Scaler>,
    ) -> Result<VideoOutput<D>, Error> {
        let hwdec = opts.hwdec;
        let swapchain_depth = opts.swapchain_depth;
        let drm = DrmState::new(dev, opts)?;
        let mut vo = VideoOutput {
            drm,
            hwdec,
            swapchain_depth,
            queue: FrameQueue::new(hwdec),
            primary: None,
            osd_buf: None,
            bufs: Vec::new(),
            front_buf: 0,
            params: None,
            src: Rectangle::default(),
            dst: Rectangle::default(),
            osd_res: OsdResolution::default(),
            cur_frame: None,
            last_input: None,
            osd_changed: false,
            want_redraw: false,
            osd,
            scaler,
            span: info_span!("drm_vo"),
        };
        if let Err(err) = vo.setup() {
            error!(parent: &vo.span, "Failed to initialize video output: {}", err);
            vo.uninit();
            return Err(err);
        }
        Ok(vo)
    }

    fn setup(&mut self) -> Result<(), Error> {
        let _guard = self.span.enter();
        let (width, height) = self.drm.display_resolution();

        let primary = DumbFramebuffer::new(self.drm.device(), width, height, Fourcc::Argb8888)?;
        self.drm.set_framebuffer(primary.id(), width, height);
        self.primary = Some(primary);

        self.drm.acquire_crtc()?;

        if self.osd_buf.is_none() {
            let osd = DumbFramebuffer::new(self.drm.device(), width / 2, height / 2, Fourcc::Argb8888)
                .map_err(|err| {
                    error!("Failed to allocate OSD buffer");
                    err
                })?;
            self.osd_buf = Some(osd);
        }

        let atomic = self.drm.atomic();
        let video = atomic.video_plane().ok_or(Error::NoVideoPlane)?;
        let mut req = AtomicRequest::new();
        set_zorder(video, &mut req, 0)?;
        set_zorder(atomic.draw_plane(), &mut req, 2)?;
        match atomic.osd_plane() {
            Some(osd) => set_zorder(osd, &mut req, 1)?,
            None => debug!("No osd plane, subtitles and osd are not shown"),
        }
        if let Err(err) = self.drm.device().commit(&req, AtomicCommitFlags::NONBLOCK) {
            warn!("Failed to commit DRM atomic request: {}", err);
        }
        Ok(())
    }

    /// The drm session
    pub fn drm(&self) -> &DrmState<D> {
        &self.drm
    }

    /// Queued frames
    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    /// Whether frames come from the hardware decoder
    pub fn hwdec(&self) -> bool {
        self.hwdec
    }

    /// Whether the player should redraw the current frame
    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.want_redraw)
    }

    /// Part of the stream shown
    pub fn src_rect(&self) -> Rectangle {
        self.src
    }

    /// Letterboxed area on screen
    pub fn dst_rect(&self) -> Rectangle {
        self.dst
    }

    /// Whether frames of `format` can be displayed
    pub fn query_format(&self, format: ImageFormat) -> bool {
        (self.hwdec && format == ImageFormat::Nv12) || self.scaler.supports(format, ImageFormat::Nv12)
    }

    /// Configures the output for a stream with `params`
    pub fn reconfig(&mut self, params: &ImageParams) -> Result<(), Error> {
        let _guard = self.span.clone().entered();
        let screen = (self.drm.width(), self.drm.height());
        let (src, mut dst) = geometry::src_dst_rects(params, screen);
        self.osd_res = OsdResolution {
            width: screen.0 / 2,
            height: screen.1 / 2,
            display_par: 1.0,
        };

        let (align_x, align_y) = ImageFormat::Nv12.align();
        dst.x = align_down(dst.x, align_x);
        dst.y = align_down(dst.y, align_y);
        self.src = src;
        self.dst = dst;
        debug!(?src, ?dst, "Reconfigured");

        let (width, height) = (src.width as u32, src.height as u32);
        self.cur_frame = Some(Image::new(ImageFormat::Nv12, width, height));
        self.last_input = None;
        self.params = Some(*params);

        if !self.hwdec {
            self.scaler
                .reinit(params, &ImageParams::new(ImageFormat::Nv12, width, height))?;
            self.destroy_buffers();
            for idx in 0..self.swapchain_depth + 1 {
                let fb = DumbFramebuffer::new(self.drm.device(), width, height, Fourcc::Nv12)?;
                let buffer = FrameBuffer::new(fb);
                buffer.set_index(idx);
                self.bufs.push(buffer);
            }
            self.front_buf = 0;
        }

        self.want_redraw = true;
        self.osd_changed = false;
        Ok(())
    }

    fn destroy_buffers(&mut self) {
        for buffer in self.bufs.drain(..) {
            buffer.destroy(self.drm.device());
        }
    }

    /// Handles a control request
    pub fn control(&mut self, request: VoControl) -> Result<ControlReply, Error> {
        match request {
            VoControl::SetPanscan => {
                if let Some(params) = self.params {
                    self.reconfig(&params)?;
                }
            }
            VoControl::Reset => self.queue.drain(),
            VoControl::Pause => self.drm.set_paused(true),
            VoControl::Resume => self.drm.set_paused(false),
            VoControl::GetDisplayFps => {
                return Ok(match self.drm.display_fps() {
                    Some(fps) => ControlReply::DisplayFps(fps),
                    None => ControlReply::NotImplemented,
                })
            }
            VoControl::GetDisplayResolution => {
                let (width, height) = self.drm.display_resolution();
                return Ok(ControlReply::DisplayResolution(width, height));
            }
            VoControl::SetHdrMetadata(csp) => {
                if !self.drm.set_hdr_metadata(&csp)? {
                    return Ok(ControlReply::NotImplemented);
                }
            }
        }
        Ok(ControlReply::Done)
    }

    /// Draws the frame of `frame` and appends it to the queue
    #[profiling::function]
    pub fn draw_frame(&mut self, frame: &crate::backend::video::DrawRequest) -> Result<(), Error> {
        if !self.drm.is_active() {
            return Ok(());
        }
        let _guard = self.span.clone().entered();
        self.drm.set_still(frame.still);

        let fb = if self.hwdec {
            let current = frame.current.as_ref().ok_or(Error::NotHardwareFrame)?;
            let buffer = current.buffer().ok_or(Error::NotHardwareFrame)?.clone();
            self.src = current.crop;
            buffer
        } else {
            self.draw_software(frame)?
        };

        self.draw_osd(frame.current.as_ref().and_then(|frame| frame.pts));
        self.queue.enqueue(fb);
        Ok(())
    }

    fn draw_software(&mut self, frame: &crate::backend::video::DrawRequest) -> Result<BufferRef, Error> {
        if self.bufs.is_empty() {
            return Err(Error::NotConfigured);
        }
        let cur_frame = self.cur_frame.as_mut().ok_or(Error::NotConfigured)?;
        let repeat = frame.repeat && !frame.redraw;
        if repeat {
            return Ok(self.bufs[self.front_buf].clone());
        }

        self.front_buf = (self.front_buf + 1) % self.bufs.len();
        let fb = self.bufs[self.front_buf].clone();

        match frame.current.as_ref().and_then(|current| current.image()) {
            Some(image) => self.scaler.scale(cur_frame, image, self.src)?,
            None => cur_frame.clear(),
        }

        {
            let mut target = fb.framebuffer();
            let (width, height) = (target.width() as usize, target.height() as usize);
            let stride = target.stride() as usize;
            if let Some(map) = target.mapping_mut() {
                let (luma, chroma) = map.split_at_mut((width * height).min(map.len()));
                let (w, h) = (cur_frame.width as usize, cur_frame.height as usize);
                let planes = &cur_frame.planes;
                copy_plane(luma, stride, &planes[0].data, planes[0].stride, w, h);
                copy_plane(chroma, stride, &planes[1].data, planes[1].stride, w, h / 2);
            }
        }

        self.last_input = frame.current.clone();
        Ok(fb)
    }

    fn draw_osd(&mut self, pts: Option<f64>) {
        let osd_buf = match self.osd_buf.as_mut() {
            Some(buf) if self.drm.atomic().osd_plane().is_some() => buf,
            _ => return,
        };
        let overlay = match self.osd.render(&self.osd_res, pts) {
            Some(overlay) => overlay,
            None => {
                error!("Cannot get OSD image!");
                return;
            }
        };
        let stride = osd_buf.stride() as usize;
        if let Some(map) = osd_buf.mapping_mut() {
            if blit_modified(map, stride, &overlay) {
                self.osd_changed = true;
            }
        }
    }

    fn queue_flip(&mut self, fb: &BufferRef) {
        let atomic = self.drm.atomic();
        let crtc = self.drm.crtc();
        let screen = (self.drm.width(), self.drm.height());
        let dev = self.drm.device();

        if let Some(video) = atomic.video_plane() {
            let rect = geometry::video_plane_rect(self.src, self.dst, screen);
            trace!(fb = fb.id(), ?rect, "Updating video plane");
            if let Err(err) = dev.update_plane(video.id(), crtc, fb.id(), rect, self.src) {
                warn!("Failed to update video plane: {}", err);
            }
        }

        if self.osd_changed {
            if let (Some(osd), Some(osd_buf)) = (atomic.osd_plane(), self.osd_buf.as_ref()) {
                let dst = Rectangle::from_size(screen.0 as i32, screen.1 as i32);
                let src = Rectangle::from_size(self.osd_res.width as i32, self.osd_res.height as i32);
                if let Err(err) = dev.update_plane(osd.id(), crtc, osd_buf.id(), dst, src) {
                    warn!("Failed to update osd plane: {}", err);
                }
            }
            self.osd_changed = false;
        }

        let result = dev.queue_page_flip(crtc, self.drm.framebuffer());
        if let Err(err) = &result {
            warn!("Failed to queue page flip: {}", err);
        }
        self.drm.set_waiting_for_flip(result.is_ok());
    }

    /// Flips to queued frames until at most `swapchain_depth` are left
    ///
    /// Drains the queue completely while paused or showing a still frame. Blocks on the
    /// outstanding page flip.
    #[profiling::function]
    pub fn flip_page(&mut self) -> Result<(), Error> {
        if !self.drm.is_active() {
            return Ok(());
        }
        let _guard = self.span.clone().entered();
        let drain = self.drm.is_paused() || self.drm.is_still();

        while drain || self.queue.len() > self.swapchain_depth {
            if self.drm.is_waiting_for_flip() {
                self.drm.wait_on_flip()?;
                self.queue.step();
            }
            if self.queue.len() <= 1 {
                break;
            }
            let next = match self.queue.get(1) {
                Some(fb) if fb.is_valid() => fb.clone(),
                _ => {
                    error!("Hole in swapchain?");
                    self.queue.step();
                    continue;
                }
            };
            self.queue_flip(&next);
            if !self.drm.is_waiting_for_flip() {
                // the frame will never be shown, retire it to make progress
                self.queue.step();
            }
        }
        Ok(())
    }

    /// Timing of the last flip
    pub fn get_vsync(&self) -> VsyncInfo {
        self.drm.vsync_info()
    }

    /// Frees all buffers and hands the display back
    ///
    /// Runs on drop as well, calling it more than once is fine.
    pub fn uninit(&mut self) {
        let _guard = self.span.clone().entered();
        if let Some(mut osd) = self.osd_buf.take() {
            osd.destroy(self.drm.device());
        }
        if !self.hwdec {
            self.destroy_buffers();
        }
        if let Some(mut primary) = self.primary.take() {
            primary.destroy(self.drm.device());
        }
        self.drm.uninit();
        self.queue.drain();
        self.last_input = None;
        self.cur_frame = None;
    }
}

impl<D: KmsDevice> BufferProvider for VideoOutput<D> {
    fn alloc_buffer(&mut self, format: Fourcc, width: u32, height: u32) -> Result<BufferRef, BufferError> {
        Ok(FrameBuffer::new(DumbFramebuffer::new(self.drm.device(), width, height, format)?))
    }

    fn release_buffer(&mut self, buffer: &BufferRef) {
        buffer.destroy(self.drm.device());
    }

    fn reset_display(&mut self) {
        self.queue.drain();
    }
}

impl<D: KmsDevice> Drop for VideoOutput<D> {
    fn drop(&mut self) {
        self.uninit();
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::backend::drm::testing::{Call, MockDevice};
    use crate::backend::video::osd::NoOsd;
    use crate::backend::video::{DrawRequest, OsdOverlay, SoftwareScaler};

    #[derive(Debug)]
    struct Subtitles {
        image: Image,
        pending: bool,
    }

    impl OsdRenderer for Subtitles {
        fn render(&mut self, res: &OsdResolution, _pts: Option<f64>) -> Option<OsdOverlay<'_>> {
            if (self.image.width, self.image.height) != (res.width, res.height) {
                self.image = Image::new(ImageFormat::Bgra, res.width, res.height);
            }
            let modified = if std::mem::take(&mut self.pending) {
                smallvec![Rectangle::new(10, 10, 20, 4)]
            } else {
                smallvec![]
            };
            Some(OsdOverlay {
                image: &self.image,
                modified,
            })
        }
    }

    fn output(dev: &MockDevice, hwdec: bool) -> VideoOutput<MockDevice> {
        let opts = DrmOptions {
            hwdec,
            ..Default::default()
        };
        VideoOutput::preinit(
            dev.clone(),
            opts,
            Box::new(NoOsd::default()),
            Box::new(SoftwareScaler::new()),
        )
        .unwrap()
    }

    fn software_frame(width: u32, height: u32) -> DrawRequest {
        DrawRequest {
            current: Some(Arc::new(VideoFrame::software(
                Image::new(ImageFormat::Yuv420p, width, height),
                Some(0.0),
            ))),
            ..Default::default()
        }
    }

    fn count(dev: &MockDevice, pred: impl Fn(&Call) -> bool) -> usize {
        dev.calls().iter().filter(|call| pred(call)).count()
    }

    #[test]
    fn preinit_stacks_planes() {
        let dev = MockDevice::new();
        let vo = output(&dev, false);
        let calls = dev.calls();
        assert!(calls.contains(&Call::CreateDumb {
            width: 1920,
            height: 1080,
            bpp: 32
        }));
        assert!(calls.contains(&Call::CreateDumb {
            width: 960,
            height: 540,
            bpp: 32
        }));
        assert!(matches!(
            calls.last(),
            Some(Call::Commit(_, flags)) if *flags == AtomicCommitFlags::NONBLOCK
        ));

        let atomic = vo.drm().atomic();
        let zorder = atomic.draw_plane().property("zorder").unwrap().id;
        assert_eq!(dev.value(MockDevice::OVERLAY_PLANE, zorder), 0);
        assert_eq!(dev.value(MockDevice::PRIMARY_PLANE, zorder), 2);
        assert_eq!(dev.value(MockDevice::OSD_PLANE, zorder), 1);
        assert!(vo.drm().is_active());
    }

    #[test]
    fn failed_preinit_restores_display() {
        let dev = MockDevice::new();
        dev.state().fail_dumb_map = true;
        let res = VideoOutput::preinit(
            dev.clone(),
            DrmOptions::default(),
            Box::new(NoOsd::default()),
            Box::new(SoftwareScaler::new()),
        );
        assert!(matches!(res, Err(Error::Buffer(_))));
        // nothing was committed and every allocation was undone
        assert_eq!(count(&dev, |c| matches!(c, Call::Commit(..))), 0);
        assert_eq!(
            count(&dev, |c| matches!(c, Call::CreateDumb { .. })),
            count(&dev, |c| matches!(c, Call::DestroyDumb(_)))
        );
    }

    #[test]
    fn reconfig_allocates_swapchain() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        dev.clear_calls();
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 1280, 720)).unwrap();
        assert_eq!(
            count(&dev, |c| *c
                == Call::CreateDumb {
                    width: 1,
                    height: 1280 * 720 * 3 / 2,
                    bpp: 8
                }),
            4
        );
        assert_eq!(vo.dst_rect(), Rectangle::new(0, 0, 1920, 1080));
        assert!(vo.take_redraw_request());
        assert!(!vo.take_redraw_request());
    }

    #[test]
    fn flip_page_keeps_swapchain_depth() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 1280, 720)).unwrap();
        dev.clear_calls();

        for _ in 0..3 {
            vo.draw_frame(&software_frame(1280, 720)).unwrap();
            vo.flip_page().unwrap();
        }
        assert_eq!(vo.queue().len(), 3);
        assert_eq!(count(&dev, |c| matches!(c, Call::PageFlip { .. })), 0);

        // flip, wait for it, retire the shown frame and flip to the next one
        vo.draw_frame(&software_frame(1280, 720)).unwrap();
        vo.flip_page().unwrap();
        assert_eq!(vo.queue().len(), 3);
        assert!(vo.drm().is_waiting_for_flip());
        let flips = count(&dev, |c| matches!(c, Call::PageFlip { .. }));
        assert_eq!(flips, 2);
        assert_eq!(count(&dev, |c| *c == Call::WaitFlip), 1);
        assert!(dev.calls().contains(&Call::PageFlip {
            crtc: MockDevice::CRTC,
            fb: vo.drm().framebuffer()
        }));
        assert!(dev.calls().iter().any(|c| matches!(
            c,
            Call::UpdatePlane { plane, dst, src, .. }
                if *plane == MockDevice::OVERLAY_PLANE
                    && *dst == Rectangle::new(0, 0, 1920, 1080)
                    && *src == Rectangle::from_size(1280, 720)
        )));
    }

    #[test]
    fn pause_drains_queue() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 640, 480)).unwrap();
        for _ in 0..3 {
            vo.draw_frame(&software_frame(640, 480)).unwrap();
        }
        vo.control(VoControl::Pause).unwrap();
        vo.flip_page().unwrap();
        assert_eq!(vo.queue().len(), 1);
        assert!(!vo.drm().is_waiting_for_flip());
    }

    #[test]
    fn repeated_frame_reuses_buffer() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        let frame = software_frame(64, 64);
        vo.draw_frame(&frame).unwrap();
        vo.draw_frame(&DrawRequest {
            repeat: true,
            ..frame.clone()
        })
        .unwrap();
        vo.draw_frame(&DrawRequest {
            repeat: true,
            redraw: true,
            ..frame
        })
        .unwrap();
        let ids: Vec<u32> = (0..3).map(|i| vo.queue().get(i).unwrap().id()).collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn hole_in_swapchain_is_skipped() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        for _ in 0..5 {
            vo.draw_frame(&software_frame(64, 64)).unwrap();
        }
        // reallocating the swapchain invalidates the queued buffers
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        dev.clear_calls();
        vo.flip_page().unwrap();
        assert!(vo.queue().len() <= 3);
        assert_eq!(count(&dev, |c| matches!(c, Call::PageFlip { .. })), 0);
    }

    #[test]
    fn failed_flip_still_makes_progress() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        for _ in 0..4 {
            vo.draw_frame(&software_frame(64, 64)).unwrap();
        }
        dev.state().fail_flip = true;
        vo.control(VoControl::Pause).unwrap();
        vo.flip_page().unwrap();
        assert_eq!(vo.queue().len(), 1);
    }

    #[test]
    fn anisotropic_source_fills_screen() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 720, 288)).unwrap();
        for _ in 0..4 {
            vo.draw_frame(&software_frame(720, 288)).unwrap();
        }
        dev.clear_calls();
        vo.flip_page().unwrap();
        assert!(dev.calls().iter().any(|c| matches!(
            c,
            Call::UpdatePlane { dst, .. } if *dst == Rectangle::new(0, 0, 1920, 1080)
        )));
    }

    #[test]
    fn osd_plane_updated_only_on_change() {
        let dev = MockDevice::new();
        let mut vo = VideoOutput::preinit(
            dev.clone(),
            DrmOptions::default(),
            Box::new(Subtitles {
                image: Image::new(ImageFormat::Bgra, 1, 1),
                pending: true,
            }),
            Box::new(SoftwareScaler::new()),
        )
        .unwrap();
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        dev.clear_calls();
        for _ in 0..6 {
            vo.draw_frame(&software_frame(64, 64)).unwrap();
            vo.flip_page().unwrap();
        }
        let osd_updates = count(&dev, |c| {
            matches!(c, Call::UpdatePlane { plane, src, .. }
                if *plane == MockDevice::OSD_PLANE && *src == Rectangle::from_size(960, 540))
        });
        assert_eq!(osd_updates, 1);
    }

    #[test]
    fn hwdec_frames_are_refcounted() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, true);
        vo.reconfig(&ImageParams::new(ImageFormat::Nv12, 64, 64)).unwrap();
        let buffers: Vec<BufferRef> = (0..5)
            .map(|_| vo.alloc_buffer(Fourcc::Nv12, 64, 64).unwrap())
            .collect();
        for buffer in &buffers {
            buffer.set_locked(true);
            let frame = VideoFrame::hardware(buffer.clone(), Rectangle::new(0, 0, 64, 48), None);
            vo.draw_frame(&DrawRequest {
                current: Some(Arc::new(frame)),
                ..Default::default()
            })
            .unwrap();
            vo.flip_page().unwrap();
        }
        assert_eq!(vo.src_rect(), Rectangle::new(0, 0, 64, 48));
        // the first two frames retired
        assert!(!buffers[0].is_locked());
        assert!(!buffers[1].is_locked());
        assert!(buffers[4].is_locked());
        assert_eq!(buffers[4].ref_count(), 1);

        vo.control(VoControl::Reset).unwrap();
        assert!(buffers.iter().all(|b| b.ref_count() == 0 && !b.is_locked()));
        for buffer in &buffers {
            vo.release_buffer(buffer);
            assert!(!buffer.is_valid());
        }
    }

    #[test]
    fn hwdec_rejects_software_frames() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, true);
        assert!(matches!(
            vo.draw_frame(&software_frame(64, 64)),
            Err(Error::NotHardwareFrame)
        ));
    }

    #[test]
    fn control_queries() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        assert_eq!(
            vo.control(VoControl::GetDisplayResolution).unwrap(),
            ControlReply::DisplayResolution(1920, 1080)
        );
        assert!(matches!(
            vo.control(VoControl::GetDisplayFps).unwrap(),
            ControlReply::DisplayFps(fps) if (fps - 60.0).abs() < 0.01
        ));
        assert_eq!(vo.control(VoControl::SetPanscan).unwrap(), ControlReply::Done);
        assert!(vo.query_format(ImageFormat::Yuv420p));
        assert!(!vo.query_format(ImageFormat::Bgra));
    }

    #[test]
    fn uninit_restores_and_frees() {
        let dev = MockDevice::new();
        let mut vo = output(&dev, false);
        vo.reconfig(&ImageParams::new(ImageFormat::Yuv420p, 64, 64)).unwrap();
        vo.draw_frame(&software_frame(64, 64)).unwrap();
        vo.uninit();

        assert!(vo.queue().is_empty());
        assert_eq!(
            count(&dev, |c| matches!(c, Call::CreateDumb { .. })),
            count(&dev, |c| matches!(c, Call::DestroyDumb(_)))
        );
        let fb_id = vo.drm().atomic().draw_plane().property("FB_ID").unwrap().id;
        assert_eq!(dev.value(MockDevice::PRIMARY_PLANE, fb_id), 77);

        dev.clear_calls();
        drop(vo);
        assert!(dev.calls().is_empty());
    }
}
