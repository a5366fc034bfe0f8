use std::io;
use std::path::PathBuf;

use super::ObjectType;

/// Errors thrown by the DRM session, its objects and the atomic context
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// No connected connector matching the request was found
    #[error("No usable connector found (requested `{0:?}`)")]
    NoConnector(Option<String>),
    /// The connector id is not part of the device resources
    #[error("Connector {0} is unknown to the device")]
    UnknownConnector(u32),
    /// The crtc id is not part of the device resources
    #[error("Crtc {0} is unknown to the device")]
    UnknownCrtc(u32),
    /// The connector cannot be driven by any crtc
    #[error("No crtc can drive connector {0}")]
    NoSuitableCrtc(u32),
    /// The requested mode does not exist on the connector
    #[error("Mode `{0}` is not available on the connector")]
    ModeNotSuitable(String),
    /// No plane could be found for drawing
    #[error("No primary or overlay plane available for crtc {0}")]
    NoDrawPlane(u32),
    /// The object is missing a required property
    #[error("The {kind:?} object {handle} is missing a required property '{name}'")]
    UnknownProperty {
        /// Object id
        handle: u32,
        /// Object type
        kind: ObjectType,
        /// Property name
        name: String,
    },
    /// The property cannot be changed
    #[error("Property '{name}' of {kind:?} object {handle} is immutable")]
    ImmutableProperty {
        /// Object id
        handle: u32,
        /// Object type
        kind: ObjectType,
        /// Property name
        name: String,
    },
    /// The old state was already captured and not yet restored
    #[error("The previous display state was already saved")]
    StateAlreadySaved,
    /// There is no saved state to restore
    #[error("No previous display state was saved")]
    StateNotSaved,
}

/// An error accessing the drm device
#[derive(thiserror::Error, Debug)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source:})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}
