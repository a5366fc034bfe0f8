#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # drm-omap: video playback plumbing for DRM/KMS on OMAP5 and DRA7
//!
//! This crate contains the display and decode side of a media player running directly on a
//! DRM/KMS device, without a display server. Video frames are scanned out from an overlay plane
//! through atomic commits, the OSD is drawn on a second overlay, and compressed video can be
//! decoded on the IVA-HD coprocessor straight into the framebuffers that get displayed.
//!
//! ## Structure of the crate
//!
//! - [`backend::drm`] wraps the kernel's mode-setting api: object properties, atomic requests,
//!   saving and restoring the display state and page flips.
//! - [`backend::allocator`] allocates dumb buffers and turns them into framebuffers.
//! - [`backend::vo`] is the video output driver, queueing frames in a swapchain and flipping
//!   them onto the video plane.
//! - [`backend::video`] holds the frame types, software scaling and OSD blitting.
//! - [`backend::decoder`] drives the hardware decoder.
//! - [`backend::color`] describes colorspaces and the HDR metadata sent to the display.
//! - [`backend::input`] reads Bluetooth remote controls.
//!
//! ## Logging
//!
//! drm-omap makes extensive use of [`tracing`] for its internal logging, with one span per
//! subsystem (`drm_atomic`, `drm_vo`, `omap_dce` and `remote`). No subscriber is installed by
//! the crate.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;
