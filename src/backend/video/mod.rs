//! Video frames as they travel from the decoder to the output
//!
//! A [`VideoFrame`] either carries a software [`Image`] that has to be converted into a
//! scanout buffer, or a [`BufferRef`] the hardware decoder already wrote into.

use std::sync::Arc;

use crate::backend::allocator::BufferRef;
use crate::backend::color::ColorSpace;
use crate::utils::Rectangle;

pub mod osd;
pub mod scale;

pub use self::osd::{blit_modified, OsdOverlay, OsdRenderer, OsdResolution};
pub use self::scale::{ScaleError, Scaler, SoftwareScaler};

/// Pixel layout of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// 8 bit luma plane followed by an interleaved, subsampled chroma plane
    Nv12,
    /// 8 bit luma and two subsampled chroma planes
    Yuv420p,
    /// Packed 32 bit blue, green, red, alpha
    Bgra,
}

impl ImageFormat {
    /// Number of planes
    pub fn planes(self) -> usize {
        match self {
            ImageFormat::Nv12 => 2,
            ImageFormat::Yuv420p => 3,
            ImageFormat::Bgra => 1,
        }
    }

    /// Required alignment of crop origins in pixels
    pub fn align(self) -> (i32, i32) {
        match self {
            ImageFormat::Nv12 | ImageFormat::Yuv420p => (2, 2),
            ImageFormat::Bgra => (1, 1),
        }
    }

    /// Bytes per line and number of lines of `plane` for an image of `width` x `height`
    pub fn plane_size(self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        match (self, plane) {
            (ImageFormat::Bgra, _) => (w * 4, h),
            (_, 0) => (w, h),
            (ImageFormat::Nv12, _) => (cw * 2, ch),
            (ImageFormat::Yuv420p, _) => (cw, ch),
        }
    }
}

/// One plane of an [`Image`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlane {
    /// Pixel data, `stride` bytes per line
    pub data: Vec<u8>,
    /// Bytes per line
    pub stride: usize,
}

/// A frame in system memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Pixel layout
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Planes, as many as the format has
    pub planes: Vec<ImagePlane>,
}

impl Image {
    /// Allocates a black image
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Image {
        let planes = (0..format.planes())
            .map(|plane| {
                let (stride, lines) = format.plane_size(plane, width, height);
                ImagePlane {
                    data: vec![0; stride * lines],
                    stride,
                }
            })
            .collect();
        let mut image = Image {
            format,
            width,
            height,
            planes,
        };
        image.clear();
        image
    }

    /// Fills the image with black
    pub fn clear(&mut self) {
        let format = self.format;
        for (idx, plane) in self.planes.iter_mut().enumerate() {
            let value = match (format, idx) {
                (ImageFormat::Bgra, _) => 0,
                (_, 0) => 16,
                _ => 128,
            };
            plane.data.fill(value);
        }
    }

    /// The whole image as a rectangle
    pub fn rect(&self) -> Rectangle {
        Rectangle::from_size(self.width as i32, self.height as i32)
    }
}

/// Format and geometry of a video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageParams {
    /// Pixel layout
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel aspect ratio as width / height
    pub pixel_aspect: (u32, u32),
    /// Colorspace
    pub color: ColorSpace,
}

impl ImageParams {
    /// Parameters with square pixels and the default colorspace
    pub fn new(format: ImageFormat, width: u32, height: u32) -> ImageParams {
        ImageParams {
            format,
            width,
            height,
            pixel_aspect: (1, 1),
            color: ColorSpace::default(),
        }
    }
}

/// Pixel data of a [`VideoFrame`]
#[derive(Debug, Clone)]
pub enum FrameContent {
    /// Decoded to system memory
    Software(Image),
    /// Decoded by the hardware decoder into a pool buffer
    Hardware(BufferRef),
}

/// A decoded frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Pixel data
    pub content: FrameContent,
    /// Visible part of the frame
    pub crop: Rectangle,
    /// Presentation timestamp in seconds
    pub pts: Option<f64>,
    /// Decoding timestamp in seconds
    pub dts: Option<f64>,
    /// Display duration in seconds
    pub duration: Option<f64>,
}

impl VideoFrame {
    /// A software frame showing all of `image`
    pub fn software(image: Image, pts: Option<f64>) -> VideoFrame {
        VideoFrame {
            crop: image.rect(),
            content: FrameContent::Software(image),
            pts,
            dts: None,
            duration: None,
        }
    }

    /// A hardware frame showing `crop` of `buffer`
    pub fn hardware(buffer: BufferRef, crop: Rectangle, pts: Option<f64>) -> VideoFrame {
        VideoFrame {
            content: FrameContent::Hardware(buffer),
            crop,
            pts,
            dts: None,
            duration: None,
        }
    }

    /// The system memory image, if any
    pub fn image(&self) -> Option<&Image> {
        match &self.content {
            FrameContent::Software(image) => Some(image),
            FrameContent::Hardware(_) => None,
        }
    }

    /// The hardware buffer, if any
    pub fn buffer(&self) -> Option<&BufferRef> {
        match &self.content {
            FrameContent::Hardware(buffer) => Some(buffer),
            FrameContent::Software(_) => None,
        }
    }
}

/// What the player wants displayed next
#[derive(Debug, Clone, Default)]
pub struct DrawRequest {
    /// Frame to show, `None` shows black
    pub current: Option<Arc<VideoFrame>>,
    /// The frame was already drawn before
    pub repeat: bool,
    /// Redrawing was explicitly requested
    pub redraw: bool,
    /// The frame stays on screen until further notice
    pub still: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_plane_sizes() {
        let image = Image::new(ImageFormat::Nv12, 5, 3);
        assert_eq!(image.planes[0].data.len(), 15);
        assert_eq!(image.planes[1].stride, 6);
        assert_eq!(image.planes[1].data.len(), 12);
        assert!(image.planes[0].data.iter().all(|&y| y == 16));
        assert!(image.planes[1].data.iter().all(|&c| c == 128));
    }

    #[test]
    fn yuv420p_has_three_planes() {
        let image = Image::new(ImageFormat::Yuv420p, 4, 4);
        assert_eq!(image.planes.len(), 3);
        assert_eq!(image.planes[2].stride, 2);
        assert_eq!(ImageFormat::Bgra.plane_size(0, 4, 2), (16, 2));
    }
}
