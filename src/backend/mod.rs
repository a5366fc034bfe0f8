//! Display, decode and input backends
//!
//! The display path is built from the bottom up:
//!
//! - [`drm`] talks to the kernel through the [`KmsDevice`](drm::KmsDevice) trait,
//! - [`allocator`] creates the framebuffers scanned out,
//! - [`vo`] queues frames and flips them onto the screen.
//!
//! Frames come either from software decoding as [`video::Image`]s or from the hardware
//! [`decoder`], which decodes into framebuffers provided by the video output.

pub mod allocator;
pub mod color;
pub mod decoder;
pub mod drm;
pub mod input;
pub mod video;
pub mod vo;
