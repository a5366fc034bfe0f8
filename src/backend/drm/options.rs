use std::str::FromStr;

use drm::control::{Mode, ModeTypeFlags};

/// Environment variable overriding [`DrmOptions::swapchain_depth`]
pub const SWAPCHAIN_DEPTH_ENV: &str = "DRM_OMAP_SWAPCHAIN_DEPTH";

/// Error parsing an option value
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// The plane selection is neither `primary`, `overlay` nor an index
    #[error("Invalid plane selection `{0}`, expected `primary`, `overlay` or a plane index")]
    InvalidPlane(String),
    /// The mode selection could not be parsed
    #[error("Invalid mode `{0}`, expected `preferred`, `highest`, an index, `WxH` or `WxH@R`")]
    InvalidMode(String),
    /// The swapchain depth is out of range
    #[error("Invalid swapchain depth `{0}`, expected 1 to 8")]
    InvalidSwapchainDepth(String),
}

/// Which plane to use for a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneSelection {
    /// The first primary plane
    Primary,
    /// The first overlay plane
    Overlay,
    /// The plane at this layer index, counting planes usable with the crtc and skipping cursor planes
    Index(usize),
}

impl FromStr for PlaneSelection {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(PlaneSelection::Primary),
            "overlay" => Ok(PlaneSelection::Overlay),
            other => other
                .parse()
                .map(PlaneSelection::Index)
                .map_err(|_| OptionError::InvalidPlane(s.to_owned())),
        }
    }
}

/// Which mode of the connector to use
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeSelection {
    /// The mode flagged as preferred, or the first mode
    Preferred,
    /// The mode with the largest area, then the highest refresh rate
    Highest,
    /// The mode at this position in the connector's list
    Index(usize),
    /// The first mode with this size and, if given, refresh rate
    Size {
        /// Width in pixels
        width: u16,
        /// Height in pixels
        height: u16,
        /// Refresh rate in Hz
        refresh: Option<u32>,
    },
}

impl ModeSelection {
    /// Picks a mode out of `modes`
    pub fn select(&self, modes: &[Mode]) -> Option<Mode> {
        match *self {
            ModeSelection::Preferred => modes
                .iter()
                .find(|mode| mode.mode_type().contains(ModeTypeFlags::PREFERRED))
                .or_else(|| modes.first())
                .copied(),
            ModeSelection::Highest => modes
                .iter()
                .max_by_key(|mode| {
                    let (w, h) = mode.size();
                    (w as u32 * h as u32, mode.vrefresh())
                })
                .copied(),
            ModeSelection::Index(idx) => modes.get(idx).copied(),
            ModeSelection::Size { width, height, refresh } => modes
                .iter()
                .find(|mode| mode.size() == (width, height) && refresh.map_or(true, |r| mode.vrefresh() == r))
                .copied(),
        }
    }
}

impl FromStr for ModeSelection {
    type Err = OptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || OptionError::InvalidMode(s.to_owned());
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "preferred" | "" => return Ok(ModeSelection::Preferred),
            "highest" => return Ok(ModeSelection::Highest),
            _ => {}
        }
        if let Ok(idx) = value.parse() {
            return Ok(ModeSelection::Index(idx));
        }
        let (size, refresh) = match value.split_once('@') {
            Some((size, refresh)) => (size, Some(refresh.parse().map_err(|_| err())?)),
            None => (value.as_str(), None),
        };
        let (width, height) = size.split_once('x').ok_or_else(err)?;
        Ok(ModeSelection::Size {
            width: width.parse().map_err(|_| err())?,
            height: height.parse().map_err(|_| err())?,
            refresh,
        })
    }
}

/// Options of the drm video output
#[derive(Debug, Clone, PartialEq)]
pub struct DrmOptions {
    /// Connector name (e.g. `HDMI-A-1`), the first connected connector if `None`
    pub connector: Option<String>,
    /// Mode to program
    pub mode: ModeSelection,
    /// Plane scanning out the primary buffer
    pub draw_plane: PlaneSelection,
    /// Plane scanning out video frames
    pub video_plane: PlaneSelection,
    /// Number of frames allowed in flight between production and display
    pub swapchain_depth: usize,
    /// Whether frames come from the hardware decoder
    pub hwdec: bool,
}

impl Default for DrmOptions {
    fn default() -> Self {
        DrmOptions {
            connector: None,
            mode: ModeSelection::Preferred,
            draw_plane: PlaneSelection::Primary,
            video_plane: PlaneSelection::Overlay,
            swapchain_depth: 3,
            hwdec: false,
        }
    }
}

impl DrmOptions {
    /// Parses a swapchain depth
    pub fn parse_swapchain_depth(value: &str) -> Result<usize, OptionError> {
        match value.trim().parse() {
            Ok(depth @ 1..=8) => Ok(depth),
            _ => Err(OptionError::InvalidSwapchainDepth(value.to_owned())),
        }
    }

    /// Applies overrides from the environment
    pub fn with_env_overrides(mut self) -> Result<Self, OptionError> {
        if let Ok(value) = std::env::var(SWAPCHAIN_DEPTH_ENV) {
            self.swapchain_depth = Self::parse_swapchain_depth(&value)?;
        }
        Ok(self)
    }
}
