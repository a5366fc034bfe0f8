//! Bluetooth remote controls read through evdev
//!
//! A [`RemoteController`] scans `/dev/input/event0` to `event31` for a supported remote and
//! forwards its key presses as [`PlayerKey`]s. The directory is watched with inotify so a
//! remote pairing after startup, or reconnecting, is picked up by rescanning.
//!
//! ```no_run
//! use std::sync::mpsc;
//! use drm_omap::backend::input::{remote::RemoteController, CancelToken};
//!
//! let (keys, received) = mpsc::channel();
//! let cancel = CancelToken::new();
//! let thread = RemoteController::new(keys, cancel.clone()).spawn().unwrap();
//! for key in received.iter().take(1) {
//!     println!("{}", key);
//! }
//! cancel.cancel();
//! thread.join().unwrap();
//! ```

use std::fmt;
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use evdev::{BusType, Device, InputEvent, InputEventKind, InputId, Key};
use rustix::fs::inotify::{self, CreateFlags, WatchFlags};
use rustix::fs::OFlags;
use tracing::{debug, error, info, info_span, trace};

use super::{CancelToken, PlayerKey};

/// Number of event devices probed
pub const MAX_EVENT_DEVICES: usize = 32;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

const PS3_BD_VENDOR: u16 = 0x054c;
const PS3_BD_PRODUCT: u16 = 0x0306;
const SATECHI_R2_VENDOR: u16 = 0x1915;
const SATECHI_R2_PRODUCT: u16 = 0xeeee;
const SATECHI_R2_NAME: &str = "R2 Remote Keyboard";

const PS3_BD_KEYMAP: &[(Key, PlayerKey)] = &[
    (Key::KEY_ESC, PlayerKey::Quit),
    (Key::KEY_ENTER, PlayerKey::PlayPause),
    (Key::KEY_UP, PlayerKey::Up),
    (Key::KEY_LEFT, PlayerKey::Left),
    (Key::KEY_RIGHT, PlayerKey::Right),
    (Key::KEY_DOWN, PlayerKey::Down),
    (Key::KEY_PAUSE, PlayerKey::PlayPause),
    (Key::KEY_STOP, PlayerKey::Quit),
    (Key::KEY_PLAY, PlayerKey::PlayPause),
];

const SATECHI_R2_KEYMAP: &[(Key, PlayerKey)] = &[
    (Key::KEY_HOMEPAGE, PlayerKey::Quit),
    (Key::KEY_VOLUMEUP, PlayerKey::Up),
    (Key::KEY_PREVIOUSSONG, PlayerKey::Left),
    (Key::KEY_NEXTSONG, PlayerKey::Right),
    (Key::KEY_VOLUMEDOWN, PlayerKey::Down),
    (Key::KEY_PLAYPAUSE, PlayerKey::PlayPause),
    (Key::KEY_MUTE, PlayerKey::Mute),
    (Key::KEY_EJECTCD, PlayerKey::CycleSubtitles),
];

/// Supported remote controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// Sony PS3 Blu-ray remote
    Ps3Bd,
    /// Satechi R2 multimedia remote
    SatechiR2,
}

impl RemoteKind {
    /// Identifies a remote from its evdev id and name
    ///
    /// Only Bluetooth devices are considered.
    pub fn identify(id: &InputId, name: Option<&str>) -> Option<RemoteKind> {
        if id.bus_type() != BusType::BUS_BLUETOOTH {
            return None;
        }
        match (id.vendor(), id.product()) {
            (PS3_BD_VENDOR, PS3_BD_PRODUCT) => Some(RemoteKind::Ps3Bd),
            (SATECHI_R2_VENDOR, SATECHI_R2_PRODUCT) if name == Some(SATECHI_R2_NAME) => {
                Some(RemoteKind::SatechiR2)
            }
            _ => None,
        }
    }

    fn keymap(self) -> &'static [(Key, PlayerKey)] {
        match self {
            RemoteKind::Ps3Bd => PS3_BD_KEYMAP,
            RemoteKind::SatechiR2 => SATECHI_R2_KEYMAP,
        }
    }

    /// The player key bound to `key`
    pub fn map_key(self, key: Key) -> Option<PlayerKey> {
        self.keymap()
            .iter()
            .find(|(code, _)| *code == key)
            .map(|(_, player_key)| *player_key)
    }

    /// Translates a key press, ignoring releases and other events
    pub fn translate(self, event: &InputEvent) -> Option<PlayerKey> {
        match event.kind() {
            InputEventKind::Key(key) if event.value() != 0 => self.map_key(key),
            _ => None,
        }
    }

    fn description(self) -> &'static str {
        match self {
            RemoteKind::Ps3Bd => "remote PS3 BD controller",
            RemoteKind::SatechiR2 => "remote Satechi R2 Remote controller",
        }
    }
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = rustix::fs::fcntl_getfl(fd)?;
    rustix::fs::fcntl_setfl(fd, flags | OFlags::NONBLOCK)?;
    Ok(())
}

/// Reads key presses from a remote control
pub struct RemoteController {
    keys: Sender<PlayerKey>,
    cancel: CancelToken,
    device_dir: PathBuf,
    remote: Option<(RemoteKind, Device)>,
    watch: Option<OwnedFd>,
    span: tracing::Span,
}

impl fmt::Debug for RemoteController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteController")
            .field("device_dir", &self.device_dir)
            .field("remote", &self.remote())
            .field("device", &self.remote.as_ref().and_then(|(_, device)| device.name()))
            .field("cancel", &self.cancel)
            .field("watching", &self.watch.is_some())
            .finish()
    }
}

impl RemoteController {
    /// A controller sending keys to `keys` until `cancel` is cancelled
    pub fn new(keys: Sender<PlayerKey>, cancel: CancelToken) -> RemoteController {
        RemoteController::with_device_dir(keys, cancel, "/dev/input")
    }

    /// A controller scanning `dir` instead of `/dev/input`
    pub fn with_device_dir(keys: Sender<PlayerKey>, cancel: CancelToken, dir: impl AsRef<Path>) -> RemoteController {
        RemoteController {
            keys,
            cancel,
            device_dir: dir.as_ref().to_path_buf(),
            remote: None,
            watch: None,
            span: info_span!("remote"),
        }
    }

    /// The connected remote, if any
    pub fn remote(&self) -> Option<RemoteKind> {
        self.remote.as_ref().map(|(kind, _)| *kind)
    }

    /// Looks for a supported remote, replacing the current one
    pub fn scan(&mut self) -> Option<RemoteKind> {
        let _guard = self.span.enter();
        self.remote = None;
        for index in 0..MAX_EVENT_DEVICES {
            let path = self.device_dir.join(format!("event{}", index));
            let device = match Device::open(&path) {
                Ok(device) => device,
                Err(err) => {
                    trace!("Could not open {:?}: {}", path, err);
                    continue;
                }
            };
            let kind = match RemoteKind::identify(&device.input_id(), device.name()) {
                Some(kind) => kind,
                None => continue,
            };
            // SAFETY: the fd is owned by `device` which outlives the borrow
            let fd = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
            if let Err(err) = set_nonblocking(fd) {
                error!("Failed to make {:?} non-blocking: {}", path, err);
                continue;
            }
            info!("Detected {} on {}", kind.description(), path.display());
            self.remote = Some((kind, device));
            return Some(kind);
        }
        None
    }

    fn watch_devices(&mut self) -> io::Result<()> {
        let fd = inotify::inotify_init(CreateFlags::CLOEXEC | CreateFlags::NONBLOCK)?;
        inotify::inotify_add_watch(fd.as_fd(), self.device_dir.as_path(), WatchFlags::CREATE | WatchFlags::DELETE)?;
        self.watch = Some(fd);
        Ok(())
    }

    fn devices_changed(&self) -> bool {
        let fd = match &self.watch {
            Some(fd) => fd,
            None => return false,
        };
        let mut buf = [0u8; 1024];
        let mut changed = false;
        while let Ok(len) = rustix::io::read(fd, &mut buf) {
            if len == 0 {
                break;
            }
            changed = true;
        }
        changed
    }

    /// Reads pending events of the remote and sends the mapped keys
    ///
    /// Returns the number of keys sent. A read error drops the remote.
    pub fn poll(&mut self) -> usize {
        let _guard = self.span.enter();
        let (kind, device) = match &mut self.remote {
            Some(remote) => remote,
            None => return 0,
        };
        let kind = *kind;
        let mut sent = 0;
        let mut lost = false;
        match device.fetch_events() {
            Ok(events) => {
                for key in events.filter_map(|event| kind.translate(&event)) {
                    trace!("Key {}", key);
                    if self.keys.send(key).is_err() {
                        debug!("Key receiver dropped");
                        break;
                    }
                    sent += 1;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                debug!("Lost {}: {}", kind.description(), err);
                lost = true;
            }
        }
        if lost {
            self.remote = None;
        }
        sent
    }

    /// Forwards keys until cancelled
    pub fn run(mut self) {
        self.scan();
        if let Err(err) = self.watch_devices() {
            error!(parent: &self.span, "Couldn't add watch to {}: {}", self.device_dir.display(), err);
            return;
        }
        while !self.cancel.is_cancelled() {
            if self.devices_changed() {
                self.scan();
            }
            self.poll();
            thread::sleep(POLL_INTERVAL);
        }
        debug!(parent: &self.span, "exited");
    }

    /// Runs the controller on its own thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("remote-controller".to_string())
            .spawn(move || self.run())
    }
}
