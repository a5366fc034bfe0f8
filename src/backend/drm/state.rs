use drm::control::{AtomicCommitFlags, Mode, ModeFlags};
use tracing::{debug, error, info, info_span, trace, warn};

use super::{
    access_error, AtomicContext, AtomicRequest, ConnectorInfo, DrmOptions, Error, HdrBlob, KmsDevice,
    PresentSync, VsyncInfo,
};
use crate::backend::color::ColorSpace;

/// A display session: one connector driven by one crtc in one mode
///
/// Created by [`DrmState::new`], which selects the connector, mode and crtc according to the
/// [`DrmOptions`] and resolves the planes. [`DrmState::acquire_crtc`] takes over the display,
/// [`DrmState::uninit`] (also run on drop) hands it back in the state it was found.
#[derive(Debug)]
pub struct DrmState<D: KmsDevice> {
    dev: D,
    opts: DrmOptions,
    connector: ConnectorInfo,
    crtc_id: u32,
    mode: Mode,
    mode_blob: u32,
    atomic: AtomicContext,
    fb_id: u32,
    width: u32,
    height: u32,
    active: bool,
    paused: bool,
    still: bool,
    waiting_for_flip: bool,
    present: PresentSync,
    hdr: HdrBlob,
    span: tracing::Span,
}

fn mode_refresh_rate(mode: &Mode) -> Option<f64> {
    let (_, _, htotal) = mode.hsync();
    let (_, _, vtotal) = mode.vsync();
    if htotal == 0 || vtotal == 0 || mode.clock() == 0 {
        return None;
    }
    let mut rate = mode.clock() as f64 * 1000.0 / (htotal as f64 * vtotal as f64);
    let flags = mode.flags();
    if flags.contains(ModeFlags::INTERLACE) {
        rate *= 2.0;
    }
    if flags.contains(ModeFlags::DBLSCAN) {
        rate /= 2.0;
    }
    Some(rate)
}

impl<D: KmsDevice> DrmState<D> {
    /// Opens a display session on `dev`
    pub fn new(dev: D, opts: DrmOptions) -> Result<DrmState<D>, Error> {
        let span = info_span!("drm_vo");
        let _guard = span.enter();

        let res = dev
            .resources()
            .map_err(access_error(&dev, "Error loading drm resources"))?;

        let mut connector = None;
        for &id in &res.connectors {
            let info = match dev.connector(id) {
                Ok(info) => info,
                Err(err) => {
                    warn!(connector = id, "Failed to query connector: {}", err);
                    continue;
                }
            };
            trace!(connector = id, name = %info.name, connected = info.connected, "Found connector");
            let wanted = match opts.connector.as_deref() {
                Some(name) => info.name.eq_ignore_ascii_case(name),
                None => info.connected,
            };
            if wanted {
                connector = Some(info);
                break;
            }
        }
        let connector = match connector {
            Some(info) if info.connected => info,
            Some(info) => {
                error!("Connector {} is not connected", info.name);
                return Err(Error::NoConnector(opts.connector.clone()));
            }
            None => return Err(Error::NoConnector(opts.connector.clone())),
        };

        let mode = opts
            .mode
            .select(&connector.modes)
            .ok_or_else(|| Error::ModeNotSuitable(format!("{:?}", opts.mode)))?;
        let (width, height) = mode.size();
        info!(
            connector = %connector.name,
            "Selected mode {}x{}@{}",
            width,
            height,
            mode.vrefresh()
        );

        let crtc_id = connector
            .crtc
            .filter(|crtc| res.crtcs.contains(crtc))
            .or_else(|| {
                res.crtcs
                    .iter()
                    .enumerate()
                    .find(|(idx, _)| connector.possible_crtcs & (1 << idx) != 0)
                    .map(|(_, &crtc)| crtc)
            })
            .ok_or(Error::NoSuitableCrtc(connector.id))?;
        debug!(crtc = crtc_id, "Selected crtc");

        let atomic = AtomicContext::new(&dev, crtc_id, connector.id, opts.draw_plane, opts.video_plane)?;

        drop(_guard);
        Ok(DrmState {
            present: PresentSync::new(mode_refresh_rate(&mode)),
            dev,
            opts,
            connector,
            crtc_id,
            mode,
            mode_blob: 0,
            atomic,
            fb_id: 0,
            width: width as u32,
            height: height as u32,
            active: false,
            paused: false,
            still: false,
            waiting_for_flip: false,
            hdr: HdrBlob::default(),
            span,
        })
    }

    /// The device
    pub fn device(&self) -> &D {
        &self.dev
    }

    /// The options the session was created with
    pub fn options(&self) -> &DrmOptions {
        &self.opts
    }

    /// The driven connector
    pub fn connector(&self) -> &ConnectorInfo {
        &self.connector
    }

    /// The driving crtc
    pub fn crtc(&self) -> u32 {
        self.crtc_id
    }

    /// The programmed mode
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// The atomic context
    pub fn atomic(&self) -> &AtomicContext {
        &self.atomic
    }

    /// Framebuffer scanned out by the draw plane
    pub fn framebuffer(&self) -> u32 {
        self.fb_id
    }

    /// Sets the framebuffer scanned out by the draw plane and its size
    pub fn set_framebuffer(&mut self, fb_id: u32, width: u32, height: u32) {
        self.fb_id = fb_id;
        self.width = width;
        self.height = height;
    }

    /// Width of the scanout buffer
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the scanout buffer
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether we drive the display
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether playback is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pauses or resumes playback. Queued frames are drained while paused.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Whether the current frame is a still frame
    pub fn is_still(&self) -> bool {
        self.still
    }

    /// Marks the current frame as a still frame
    pub fn set_still(&mut self, still: bool) {
        self.still = still;
    }

    /// Whether a page flip is outstanding
    pub fn is_waiting_for_flip(&self) -> bool {
        self.waiting_for_flip
    }

    /// Records whether a page flip is outstanding
    pub fn set_waiting_for_flip(&mut self, waiting: bool) {
        self.waiting_for_flip = waiting;
    }

    /// Refresh rate of the mode in Hz
    pub fn display_fps(&self) -> Option<f64> {
        mode_refresh_rate(&self.mode)
    }

    /// Size of the mode in pixels
    pub fn display_resolution(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (w as u32, h as u32)
    }

    /// Timing of the last flip
    pub fn vsync_info(&self) -> VsyncInfo {
        self.present.info()
    }

    /// Takes over the display
    ///
    /// Saves the current state, then binds the connector to the crtc, programs the mode and
    /// puts the current framebuffer on the draw plane, covering the whole screen.
    pub fn acquire_crtc(&mut self) -> Result<(), Error> {
        let _guard = self.span.enter();
        self.atomic.save_old_state(&self.dev)?;

        if self.mode_blob == 0 {
            self.mode_blob = self
                .dev
                .create_mode_blob(&self.mode)
                .map_err(access_error(&self.dev, "Failed to create mode blob"))?;
        }

        let (mode_w, mode_h) = self.display_resolution();
        let crtc = self.crtc_id as u64;
        let mut req = AtomicRequest::new();
        self.atomic.connector().set(&mut req, "CRTC_ID", crtc)?;
        self.atomic.crtc().set(&mut req, "MODE_ID", self.mode_blob as u64)?;
        self.atomic.crtc().set(&mut req, "ACTIVE", 1)?;

        let plane = self.atomic.draw_plane();
        plane.set(&mut req, "FB_ID", self.fb_id as u64)?;
        plane.set(&mut req, "CRTC_ID", crtc)?;
        plane.set(&mut req, "SRC_X", 0)?;
        plane.set(&mut req, "SRC_Y", 0)?;
        plane.set(&mut req, "SRC_W", (self.width as u64) << 16)?;
        plane.set(&mut req, "SRC_H", (self.height as u64) << 16)?;
        plane.set(&mut req, "CRTC_X", 0)?;
        plane.set(&mut req, "CRTC_Y", 0)?;
        plane.set(&mut req, "CRTC_W", mode_w as u64)?;
        plane.set(&mut req, "CRTC_H", mode_h as u64)?;

        self.dev
            .commit(&req, AtomicCommitFlags::ALLOW_MODESET)
            .map_err(access_error(&self.dev, "Failed to commit crtc state"))?;
        self.active = true;
        Ok(())
    }

    /// Restores the display state found by [`DrmState::acquire_crtc`]
    ///
    /// Does nothing if no state is saved.
    pub fn release_crtc(&mut self) {
        let _guard = self.span.enter();
        if !self.atomic.is_saved() {
            return;
        }

        let mut req = AtomicRequest::new();
        if let Err(err) = self.atomic.restore_old_state(&self.dev, &mut req) {
            warn!("Failed to restore the complete previous state: {}", err);
        }
        if let Err(err) = self.dev.commit(&req, AtomicCommitFlags::ALLOW_MODESET) {
            error!("Failed to restore previous crtc state: {}", err);
        }
        self.active = false;
    }

    /// Blocks until the outstanding page flip of our crtc completed
    pub fn wait_on_flip(&mut self) -> Result<(), Error> {
        while self.waiting_for_flip {
            let event = self
                .dev
                .wait_page_flip()
                .map_err(access_error(&self.dev, "Failed to wait for page flip"))?;
            if event.crtc != self.crtc_id {
                trace!(crtc = event.crtc, "Ignoring flip of a foreign crtc");
                continue;
            }
            self.present.record(&event);
            self.waiting_for_flip = false;
        }
        Ok(())
    }

    /// Publishes the HDR metadata of `csp` on the connector
    ///
    /// Returns `false` if the connector does not support HDR metadata.
    pub fn set_hdr_metadata(&mut self, csp: &ColorSpace) -> Result<bool, Error> {
        let _guard = self.span.enter();
        if !self.atomic.connector().has("HDR_OUTPUT_METADATA") {
            debug!("Connector has no HDR_OUTPUT_METADATA property");
            return Ok(false);
        }
        let previous = self.hdr.id();
        let blob = self.hdr.update(&self.dev, csp)?;
        if blob == previous {
            return Ok(true);
        }

        let mut req = AtomicRequest::new();
        self.atomic
            .connector()
            .set(&mut req, "HDR_OUTPUT_METADATA", blob as u64)?;
        self.dev
            .commit(&req, AtomicCommitFlags::ALLOW_MODESET)
            .map_err(access_error(&self.dev, "Failed to commit HDR metadata"))?;
        Ok(true)
    }

    /// Hands the display back and frees the kernel objects of the session
    ///
    /// Safe to call more than once.
    pub fn uninit(&mut self) {
        self.release_crtc();
        self.hdr.destroy(&self.dev);
        self.atomic.destroy(&self.dev);
        if self.mode_blob != 0 {
            if let Err(err) = self.dev.destroy_blob(self.mode_blob) {
                warn!("Failed to destroy mode blob: {}", err);
            }
            self.mode_blob = 0;
        }
        self.waiting_for_flip = false;
        self.present.reset();
    }
}

impl<D: KmsDevice> Drop for DrmState<D> {
    fn drop(&mut self) {
        self.uninit();
    }
}
