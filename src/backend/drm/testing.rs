//! In-memory [`KmsDevice`] used by the unit tests

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::io::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use drm::control::{AtomicCommitFlags, Mode};

use super::{
    AtomicRequest, ConnectorInfo, DumbAllocation, FlipEvent, FramebufferLayout, KmsDevice, ObjectType,
    PlaneInfo, PropertyInfo, Resources,
};
use crate::backend::allocator::MappedBuffer;
use crate::utils::Rectangle;

/// A recorded kernel call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Commit(AtomicRequest, AtomicCommitFlags),
    CreateBlob(u32, Vec<u8>),
    CreateModeBlob(u32),
    DestroyBlob(u32),
    CreateDumb { width: u32, height: u32, bpp: u32 },
    MapDumb(u32),
    DestroyDumb(u32),
    ExportPrime(u32),
    AddFramebuffer(u32, FramebufferLayout),
    RemoveFramebuffer(u32),
    UpdatePlane { plane: u32, crtc: u32, fb: u32, dst: Rectangle, src: Rectangle },
    PageFlip { crtc: u32, fb: u32 },
    WaitFlip,
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub calls: Vec<Call>,
    pub values: HashMap<(u32, u32), u64>,
    pub pending_flips: Vec<u32>,
    pub sequence: u32,
    pub next_id: u32,
    pub fail_commit: bool,
    pub fail_flip: bool,
    pub fail_dumb_map: bool,
    pub crtc_mode: Option<Mode>,
}

const PROP_ACTIVE: u32 = 1;
const PROP_MODE_ID: u32 = 2;
const PROP_VRR_ENABLED: u32 = 3;
const PROP_CONN_CRTC_ID: u32 = 10;
const PROP_HDR_OUTPUT_METADATA: u32 = 11;
const PLANE_PROPS: &[(u32, &str, bool)] = &[
    (20, "type", true),
    (21, "FB_ID", false),
    (22, "CRTC_ID", false),
    (23, "SRC_X", false),
    (24, "SRC_Y", false),
    (25, "SRC_W", false),
    (26, "SRC_H", false),
    (27, "CRTC_X", false),
    (28, "CRTC_Y", false),
    (29, "CRTC_W", false),
    (30, "CRTC_H", false),
    (31, "zpos", false),
    (32, "zorder", false),
];

/// A device with one connector, two crtcs and four planes on the first crtc
/// (primary, cursor, two overlays) plus an overlay only usable on the second crtc.
#[derive(Debug, Clone)]
pub(crate) struct MockDevice(Arc<Mutex<MockState>>);

pub(crate) fn mode(width: u16, height: u16, refresh: u32, preferred: bool) -> Mode {
    // SAFETY: drm_mode_modeinfo is a plain C struct, all-zero is a valid value
    let mut raw: drm_ffi::drm_mode_modeinfo = unsafe { std::mem::zeroed() };
    raw.hdisplay = width;
    raw.vdisplay = height;
    raw.htotal = width + 280;
    raw.vtotal = height + 45;
    raw.vrefresh = refresh;
    raw.clock = (raw.htotal as u32 * raw.vtotal as u32 * refresh) / 1000;
    raw.type_ = if preferred { 1 << 3 } else { 0 };
    for (dst, src) in raw.name.iter_mut().zip(format!("{}x{}", width, height).bytes()) {
        *dst = src as _;
    }
    Mode::from(raw)
}

impl MockDevice {
    pub const CRTC: u32 = 40;
    pub const CRTC_2: u32 = 41;
    pub const CONNECTOR: u32 = 30;
    pub const PRIMARY_PLANE: u32 = 50;
    pub const CURSOR_PLANE: u32 = 51;
    pub const OVERLAY_PLANE: u32 = 52;
    pub const OSD_PLANE: u32 = 53;
    pub const OTHER_PLANE: u32 = 54;

    pub fn new() -> Self {
        let mut state = MockState {
            next_id: 1000,
            crtc_mode: Some(mode(1920, 1080, 60, true)),
            ..Default::default()
        };
        state.values.insert((Self::CRTC, PROP_ACTIVE), 1);
        state.values.insert((Self::CRTC, PROP_MODE_ID), 99);
        state.values.insert((Self::CRTC, PROP_VRR_ENABLED), 0);
        state.values.insert((Self::CONNECTOR, PROP_CONN_CRTC_ID), Self::CRTC as u64);
        for (plane, kind) in [
            (Self::PRIMARY_PLANE, 1),
            (Self::CURSOR_PLANE, 2),
            (Self::OVERLAY_PLANE, 0),
            (Self::OSD_PLANE, 0),
            (Self::OTHER_PLANE, 0),
        ] {
            for &(id, _, _) in PLANE_PROPS {
                state.values.insert((plane, id), 0);
            }
            state.values.insert((plane, 20), kind);
        }
        // desktop state of the primary plane
        for (id, value) in [(21, 77), (22, Self::CRTC as u64), (25, 1920 << 16), (26, 1080 << 16), (29, 1920), (30, 1080), (31, 3)] {
            state.values.insert((Self::PRIMARY_PLANE, id), value);
        }
        MockDevice(Arc::new(Mutex::new(state)))
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn value(&self, object: u32, prop: u32) -> u64 {
        self.state().values.get(&(object, prop)).copied().unwrap_or(0)
    }

    pub fn set_value(&self, object: u32, prop: u32, value: u64) {
        self.state().values.insert((object, prop), value);
    }

    /// Snapshot of every property value
    pub fn values(&self) -> HashMap<(u32, u32), u64> {
        self.state().values.clone()
    }

    fn next_id(&self) -> u32 {
        let mut state = self.state();
        state.next_id += 1;
        state.next_id
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

impl KmsDevice for MockDevice {
    fn resources(&self) -> io::Result<Resources> {
        Ok(Resources {
            crtcs: vec![Self::CRTC, Self::CRTC_2],
            connectors: vec![Self::CONNECTOR],
        })
    }

    fn planes(&self) -> io::Result<Vec<PlaneInfo>> {
        Ok(vec![
            PlaneInfo { id: Self::PRIMARY_PLANE, possible_crtcs: 0b01 },
            PlaneInfo { id: Self::CURSOR_PLANE, possible_crtcs: 0b01 },
            PlaneInfo { id: Self::OTHER_PLANE, possible_crtcs: 0b10 },
            PlaneInfo { id: Self::OVERLAY_PLANE, possible_crtcs: 0b11 },
            PlaneInfo { id: Self::OSD_PLANE, possible_crtcs: 0b01 },
        ])
    }

    fn connector(&self, id: u32) -> io::Result<ConnectorInfo> {
        if id != Self::CONNECTOR {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        Ok(ConnectorInfo {
            id,
            name: String::from("HDMI-A-1"),
            connected: true,
            modes: vec![
                mode(1920, 1080, 60, true),
                mode(1280, 720, 60, false),
                mode(1920, 1080, 50, false),
                mode(3840, 2160, 30, false),
            ],
            crtc: Some(Self::CRTC),
            possible_crtcs: 0b11,
        })
    }

    fn crtc_mode(&self, _crtc: u32) -> io::Result<Option<Mode>> {
        Ok(self.state().crtc_mode)
    }

    fn properties(&self, object: u32, kind: ObjectType) -> io::Result<Vec<(PropertyInfo, u64)>> {
        let props: Vec<(u32, &str, bool)> = match kind {
            ObjectType::Crtc => vec![
                (PROP_ACTIVE, "ACTIVE", false),
                (PROP_MODE_ID, "MODE_ID", false),
                (PROP_VRR_ENABLED, "VRR_ENABLED", false),
            ],
            ObjectType::Connector => vec![
                (PROP_CONN_CRTC_ID, "CRTC_ID", false),
                (PROP_HDR_OUTPUT_METADATA, "HDR_OUTPUT_METADATA", false),
            ],
            ObjectType::Plane => PLANE_PROPS.to_vec(),
        };
        Ok(props
            .into_iter()
            .map(|(id, name, immutable)| {
                (
                    PropertyInfo {
                        id,
                        name: name.to_owned(),
                        immutable,
                    },
                    self.value(object, id),
                )
            })
            .collect())
    }

    fn create_blob(&self, data: &[u8]) -> io::Result<u32> {
        let id = self.next_id();
        self.record(Call::CreateBlob(id, data.to_vec()));
        Ok(id)
    }

    fn create_mode_blob(&self, _mode: &Mode) -> io::Result<u32> {
        let id = self.next_id();
        self.record(Call::CreateModeBlob(id));
        Ok(id)
    }

    fn destroy_blob(&self, blob: u32) -> io::Result<()> {
        self.record(Call::DestroyBlob(blob));
        Ok(())
    }

    fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Commit(request.clone(), flags));
        if state.fail_commit {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if !flags.contains(AtomicCommitFlags::TEST_ONLY) {
            for (object, prop, value) in request.iter() {
                state.values.insert((object, prop), value);
            }
        }
        Ok(())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let handle = self.next_id();
        self.record(Call::CreateDumb { width, height, bpp });
        let pitch = width * ((bpp + 7) / 8);
        Ok(DumbAllocation {
            handle,
            pitch,
            size: pitch as u64 * height as u64,
        })
    }

    fn map_dumb(&self, handle: u32, size: usize) -> io::Result<MappedBuffer> {
        self.record(Call::MapDumb(handle));
        if self.state().fail_dumb_map {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let mut map = MappedBuffer::heap(size);
        map.fill(0xaa);
        Ok(map)
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        self.record(Call::DestroyDumb(handle));
        Ok(())
    }

    fn export_prime(&self, handle: u32) -> io::Result<OwnedFd> {
        self.record(Call::ExportPrime(handle));
        Ok(File::open("/dev/null")?.into())
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<u32> {
        let id = self.next_id();
        self.record(Call::AddFramebuffer(id, *layout));
        Ok(id)
    }

    fn remove_framebuffer(&self, fb: u32) -> io::Result<()> {
        self.record(Call::RemoveFramebuffer(fb));
        Ok(())
    }

    fn update_plane(&self, plane: u32, crtc: u32, fb: u32, dst: Rectangle, src: Rectangle) -> io::Result<()> {
        self.record(Call::UpdatePlane { plane, crtc, fb, dst, src });
        Ok(())
    }

    fn queue_page_flip(&self, crtc: u32, fb: u32) -> io::Result<()> {
        let mut state = self.state();
        state.calls.push(Call::PageFlip { crtc, fb });
        if state.fail_flip {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.pending_flips.push(crtc);
        Ok(())
    }

    fn wait_page_flip(&self) -> io::Result<FlipEvent> {
        let mut state = self.state();
        state.calls.push(Call::WaitFlip);
        if state.pending_flips.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let crtc = state.pending_flips.remove(0);
        state.sequence += 1;
        Ok(FlipEvent {
            crtc,
            sequence: state.sequence,
            time: Duration::from_micros(16_667 * state.sequence as u64),
        })
    }
}
