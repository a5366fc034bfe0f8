//! On screen display and subtitle overlay

use std::fmt;

use smallvec::SmallVec;

use super::Image;
use crate::utils::{copy_plane, Rectangle};

/// Geometry the osd is rendered at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsdResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel aspect ratio of the display
    pub display_par: f64,
}

impl Default for OsdResolution {
    fn default() -> Self {
        OsdResolution {
            width: 0,
            height: 0,
            display_par: 1.0,
        }
    }
}

/// A rendered osd frame
#[derive(Debug)]
pub struct OsdOverlay<'a> {
    /// The full osd in BGRA at the requested resolution
    pub image: &'a Image,
    /// Parts of `image` that changed since the last render
    pub modified: SmallVec<[Rectangle; 4]>,
}

/// Renders subtitles and the osd
pub trait OsdRenderer: fmt::Debug {
    /// Renders the overlay for the frame at `pts`, `None` if rendering failed
    fn render(&mut self, res: &OsdResolution, pts: Option<f64>) -> Option<OsdOverlay<'_>>;
}

/// An osd that never shows anything
#[derive(Debug, Default)]
pub struct NoOsd {
    image: Option<Image>,
}

impl OsdRenderer for NoOsd {
    fn render(&mut self, res: &OsdResolution, _pts: Option<f64>) -> Option<OsdOverlay<'_>> {
        let image = match self.image.take() {
            Some(image) if (image.width, image.height) == (res.width, res.height) => image,
            _ => Image::new(super::ImageFormat::Bgra, res.width, res.height),
        };
        Some(OsdOverlay {
            image: self.image.insert(image),
            modified: SmallVec::new(),
        })
    }
}

/// Copies the modified rectangles of `overlay` into a 32 bit buffer with `dst_stride`
///
/// Returns whether anything was copied.
#[profiling::function]
pub fn blit_modified(dst: &mut [u8], dst_stride: usize, overlay: &OsdOverlay<'_>) -> bool {
    let src = match overlay.image.planes.first() {
        Some(plane) => plane,
        None => return false,
    };
    let bounds = overlay.image.rect();
    let count = overlay.modified.len();
    let mut changed = false;

    for (n, rect) in overlay.modified.iter().enumerate() {
        changed = true;
        let rect = match rect.intersection(&bounds) {
            Some(rect) => rect,
            None => continue,
        };
        let (x, y) = (rect.x as usize, rect.y as usize);
        let mut lines = rect.height as usize;
        // TODO: the last rectangle is copied one row short to stay inside the destination,
        // find the off-by-one in the rectangle computation instead.
        if n == count - 1 {
            lines -= 1;
        }

        let src_offset = y * src.stride + x * 4;
        let dst_offset = y * dst_stride + x * 4;
        if src_offset >= src.data.len() || dst_offset >= dst.len() {
            continue;
        }
        copy_plane(
            &mut dst[dst_offset..],
            dst_stride,
            &src.data[src_offset..],
            src.stride,
            rect.width as usize * 4,
            lines,
        );
    }
    changed
}
