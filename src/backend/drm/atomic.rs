use drm::control::Mode;
use tracing::{debug, error, info, info_span, trace, warn};

use super::{access_error, AtomicRequest, DrmObject, Error, KmsDevice, ObjectType, PlaneSelection};

/// Value of a plane's `type` property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    /// Overlay plane
    Overlay,
    /// Primary plane
    Primary,
    /// Cursor plane
    Cursor,
}

impl PlaneType {
    /// Parses the raw property value
    pub fn from_raw(value: u64) -> Option<PlaneType> {
        match value {
            0 => Some(PlaneType::Overlay),
            1 => Some(PlaneType::Primary),
            2 => Some(PlaneType::Cursor),
            _ => None,
        }
    }
}

/// Framebuffer binding and geometry of a plane
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaneState {
    /// `FB_ID`
    pub fb_id: u64,
    /// `CRTC_ID`
    pub crtc_id: u64,
    /// `SRC_X`, 16.16 fixed point
    pub src_x: u64,
    /// `SRC_Y`, 16.16 fixed point
    pub src_y: u64,
    /// `SRC_W`, 16.16 fixed point
    pub src_w: u64,
    /// `SRC_H`, 16.16 fixed point
    pub src_h: u64,
    /// `CRTC_X`
    pub crtc_x: u64,
    /// `CRTC_Y`
    pub crtc_y: u64,
    /// `CRTC_W`
    pub crtc_w: u64,
    /// `CRTC_H`
    pub crtc_h: u64,
    /// `ZPOS`, if the plane has one
    pub zpos: Option<u64>,
}

const PLANE_PROPS: [&str; 10] = [
    "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W", "CRTC_H",
];

impl PlaneState {
    fn fields(&self) -> [u64; 10] {
        [
            self.fb_id,
            self.crtc_id,
            self.src_x,
            self.src_y,
            self.src_w,
            self.src_h,
            self.crtc_x,
            self.crtc_y,
            self.crtc_w,
            self.crtc_h,
        ]
    }

    fn capture(plane: &DrmObject) -> Result<PlaneState, Error> {
        let mut values = [0u64; 10];
        for (value, name) in values.iter_mut().zip(PLANE_PROPS) {
            *value = plane.get(name)?;
        }
        let [fb_id, crtc_id, src_x, src_y, src_w, src_h, crtc_x, crtc_y, crtc_w, crtc_h] = values;
        Ok(PlaneState {
            fb_id,
            crtc_id,
            src_x,
            src_y,
            src_w,
            src_h,
            crtc_x,
            crtc_y,
            crtc_w,
            crtc_h,
            zpos: plane.get("ZPOS").ok(),
        })
    }

    fn restore(&self, plane: &DrmObject, req: &mut AtomicRequest) -> Result<(), Error> {
        let mut result = Ok(());
        for (value, name) in self.fields().into_iter().zip(PLANE_PROPS) {
            keep_first_error(&mut result, plane.set(req, name, value));
        }
        if let Some(zpos) = self.zpos {
            // zpos may be immutable
            let _ = plane.set(req, "ZPOS", zpos);
        }
        result
    }
}

/// The display state found before we took over the crtc
#[derive(Debug, Default, Clone)]
pub struct SavedState {
    /// Mode programmed on the crtc
    pub mode: Option<Mode>,
    /// `ACTIVE` of the crtc
    pub active: u64,
    /// `VRR_ENABLED` of the crtc, on kernels that have it
    pub vrr_enabled: Option<u64>,
    /// `CRTC_ID` of the connector
    pub connector_crtc: u64,
    /// State of the draw plane
    pub draw_plane: PlaneState,
    /// State of the video plane
    pub video_plane: PlaneState,
    mode_blob: u32,
    saved: bool,
}

impl SavedState {
    fn destroy_mode_blob<D: KmsDevice + ?Sized>(&mut self, dev: &D) {
        if self.mode_blob != 0 {
            if let Err(err) = dev.destroy_blob(self.mode_blob) {
                warn!("Failed to destroy mode blob: {}", err);
            }
            self.mode_blob = 0;
        }
    }
}

fn keep_first_error(result: &mut Result<(), Error>, next: Result<(), Error>) {
    if let Err(err) = next {
        warn!("Failed to restore property: {}", err);
        if result.is_ok() {
            *result = Err(err);
        }
    }
}

/// The crtc, connector and planes used for composition
///
/// Three planes take part: the draw plane scanning out the primary buffer,
/// the video plane scanning out decoded frames and the osd plane for subtitles and
/// on screen display. Their roles are fixed once the context is created.
#[derive(Debug)]
pub struct AtomicContext {
    crtc: DrmObject,
    connector: DrmObject,
    draw_plane: DrmObject,
    video_plane: Option<DrmObject>,
    osd_plane: Option<DrmObject>,
    old_state: SavedState,
    span: tracing::Span,
}

impl AtomicContext {
    /// Resolves the objects for `crtc_id` and `connector_id`
    ///
    /// Planes usable with the crtc are scanned in kernel order, cursor planes are ignored and do
    /// not count as a layer. The first primary and the first overlay plane are remembered, a second
    /// overlay plane becomes the osd plane. Planes selected by [`PlaneSelection::Index`] take
    /// precedence over the type based selection.
    pub fn new<D: KmsDevice + ?Sized>(
        dev: &D,
        crtc_id: u32,
        connector_id: u32,
        draw: PlaneSelection,
        video: PlaneSelection,
    ) -> Result<AtomicContext, Error> {
        let span = info_span!("drm_atomic", crtc = crtc_id);
        let _guard = span.enter();

        let res = dev
            .resources()
            .map_err(access_error(dev, "Error loading drm resources"))?;
        let crtc_index = res
            .crtcs
            .iter()
            .position(|&crtc| crtc == crtc_id)
            .ok_or(Error::UnknownCrtc(crtc_id))?;
        if !res.connectors.contains(&connector_id) {
            return Err(Error::UnknownConnector(connector_id));
        }

        let crtc = DrmObject::new(dev, crtc_id, ObjectType::Crtc)?;
        let connector = DrmObject::new(dev, connector_id, ObjectType::Connector)?;

        let planes = dev.planes().map_err(access_error(dev, "Error loading planes"))?;

        let mut primary = None;
        let mut overlay = None;
        let mut osd = None;
        let mut draw_plane = None;
        let mut video_plane = None;
        let mut layer = 0usize;

        for info in planes
            .into_iter()
            .filter(|plane| plane.possible_crtcs & (1 << crtc_index) != 0)
        {
            let plane = DrmObject::new(dev, info.id, ObjectType::Plane)?;
            let kind = plane.get("TYPE")?;
            let kind = match PlaneType::from_raw(kind) {
                Some(PlaneType::Cursor) => continue,
                Some(kind) => kind,
                None => {
                    warn!(plane = info.id, "Unknown plane type {}", kind);
                    continue;
                }
            };

            trace!(plane = info.id, layer, ?kind, "Found plane");
            match kind {
                PlaneType::Primary if primary.is_none() => primary = Some(plane.clone()),
                PlaneType::Overlay if overlay.is_none() => overlay = Some(plane.clone()),
                PlaneType::Overlay if osd.is_none() => osd = Some(plane.clone()),
                _ => {}
            }

            if draw == PlaneSelection::Index(layer) {
                draw_plane = Some(plane);
            } else if video == PlaneSelection::Index(layer) {
                video_plane = Some(plane);
            }
            layer += 1;
        }

        let draw_plane = match draw_plane {
            Some(plane) => plane,
            None => {
                let fallback = if draw == PlaneSelection::Overlay {
                    overlay.clone()
                } else {
                    primary.clone()
                };
                fallback.ok_or_else(|| {
                    error!("Failed to find draw plane with index {:?}", draw);
                    Error::NoDrawPlane(crtc_id)
                })?
            }
        };

        let video_plane = video_plane.or_else(|| {
            let fallback = if video == PlaneSelection::Primary {
                primary.clone()
            } else {
                overlay.clone()
            };
            if fallback.is_none() {
                debug!("Failed to find video plane with index {:?}", video);
            }
            fallback
        });

        if osd.is_none() {
            debug!("No second overlay plane available for the osd");
        }

        info!(
            draw_plane = draw_plane.id(),
            video_plane = ?video_plane.as_ref().map(DrmObject::id),
            osd_plane = ?osd.as_ref().map(DrmObject::id),
            "Resolved atomic context"
        );

        drop(_guard);
        Ok(AtomicContext {
            crtc,
            connector,
            draw_plane,
            video_plane,
            osd_plane: osd,
            old_state: SavedState::default(),
            span,
        })
    }

    /// The crtc
    pub fn crtc(&self) -> &DrmObject {
        &self.crtc
    }

    /// The connector
    pub fn connector(&self) -> &DrmObject {
        &self.connector
    }

    /// Plane scanning out the primary buffer
    pub fn draw_plane(&self) -> &DrmObject {
        &self.draw_plane
    }

    /// Plane scanning out video frames
    pub fn video_plane(&self) -> Option<&DrmObject> {
        self.video_plane.as_ref()
    }

    /// Plane scanning out the osd
    pub fn osd_plane(&self) -> Option<&DrmObject> {
        self.osd_plane.as_ref()
    }

    /// The saved state
    pub fn saved_state(&self) -> &SavedState {
        &self.old_state
    }

    /// Whether a state was saved and not yet restored
    pub fn is_saved(&self) -> bool {
        self.old_state.saved
    }

    /// Captures the current display state so it can be restored later
    ///
    /// Property values are re-queried first. Fails if a state is already saved.
    pub fn save_old_state<D: KmsDevice + ?Sized>(&mut self, dev: &D) -> Result<(), Error> {
        let _guard = self.span.enter();
        if self.old_state.saved {
            return Err(Error::StateAlreadySaved);
        }

        self.crtc.refresh(dev)?;
        self.connector.refresh(dev)?;
        self.draw_plane.refresh(dev)?;
        if let Some(video) = self.video_plane.as_mut() {
            video.refresh(dev)?;
        }

        let mode = dev
            .crtc_mode(self.crtc.id())
            .map_err(access_error(dev, "Error loading crtc mode"))?;
        let state = SavedState {
            mode,
            active: self.crtc.get("ACTIVE")?,
            // only exists since linux 5.0
            vrr_enabled: self.crtc.get("VRR_ENABLED").ok(),
            connector_crtc: self.connector.get("CRTC_ID")?,
            draw_plane: PlaneState::capture(&self.draw_plane)?,
            video_plane: match self.video_plane.as_ref() {
                Some(plane) => PlaneState::capture(plane)?,
                None => PlaneState::default(),
            },
            mode_blob: 0,
            saved: true,
        };

        // drop a blob from an earlier save
        self.old_state.destroy_mode_blob(dev);
        debug!(?state, "Saved display state");
        self.old_state = state;
        Ok(())
    }

    /// Adds the saved state to `req`
    ///
    /// Every property is attempted even if an earlier one fails; the first failure is returned.
    /// Fails if no state is saved. The state counts as consumed afterwards.
    pub fn restore_old_state<D: KmsDevice + ?Sized>(&mut self, dev: &D, req: &mut AtomicRequest) -> Result<(), Error> {
        let _guard = self.span.enter();
        if !self.old_state.saved {
            return Err(Error::StateNotSaved);
        }

        let mut result = Ok(());
        let state = &mut self.old_state;

        keep_first_error(
            &mut result,
            self.connector.set(req, "CRTC_ID", state.connector_crtc),
        );
        if let Some(vrr) = state.vrr_enabled {
            let _ = self.crtc.set(req, "VRR_ENABLED", vrr);
        }

        if state.mode_blob == 0 {
            if let Some(mode) = state.mode.as_ref() {
                match dev.create_mode_blob(mode) {
                    Ok(blob) => state.mode_blob = blob,
                    Err(source) => keep_first_error(
                        &mut result,
                        Err(access_error(dev, "Failed to create mode blob")(source)),
                    ),
                }
            }
        }
        keep_first_error(&mut result, self.crtc.set(req, "MODE_ID", state.mode_blob as u64));
        keep_first_error(&mut result, self.crtc.set(req, "ACTIVE", state.active));

        keep_first_error(&mut result, state.draw_plane.restore(&self.draw_plane, req));
        if let Some(video) = self.video_plane.as_ref() {
            keep_first_error(&mut result, state.video_plane.restore(video, req));
        }

        state.saved = false;
        result
    }

    /// Releases the kernel resources held by the context
    pub fn destroy<D: KmsDevice + ?Sized>(&mut self, dev: &D) {
        self.old_state.destroy_mode_blob(dev);
    }
}
