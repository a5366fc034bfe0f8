//! Conversion of decoded images into the scanout format

use std::fmt;

use super::{Image, ImageFormat, ImageParams};
use crate::utils::Rectangle;

/// Errors of a [`Scaler`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    /// The conversion between the formats is not supported
    #[error("Cannot convert {src:?} to {dst:?}")]
    Unsupported {
        /// Source format
        src: ImageFormat,
        /// Destination format
        dst: ImageFormat,
    },
    /// `scale` was called before `reinit`
    #[error("Scaler is not configured")]
    NotConfigured,
    /// The source rectangle does not cover any pixel of the source image
    #[error("Source rectangle {0:?} is empty")]
    EmptySource(Rectangle),
}

/// Scales and converts images
pub trait Scaler: fmt::Debug {
    /// Whether `src` images can be converted into `dst` images
    fn supports(&self, src: ImageFormat, dst: ImageFormat) -> bool;
    /// Prepares the conversion from `src` to `dst` parameters
    fn reinit(&mut self, src: &ImageParams, dst: &ImageParams) -> Result<(), ScaleError>;
    /// Scales `src_rect` of `src` to cover all of `dst`
    fn scale(&mut self, dst: &mut Image, src: &Image, src_rect: Rectangle) -> Result<(), ScaleError>;
}

/// Nearest neighbour scaler converting planar and semi-planar 4:2:0 into NV12
#[derive(Debug, Default)]
pub struct SoftwareScaler {
    config: Option<(ImageParams, ImageParams)>,
}

impl SoftwareScaler {
    /// A scaler that still needs to be configured
    pub fn new() -> SoftwareScaler {
        SoftwareScaler::default()
    }
}

fn sample(dst_pos: usize, dst_len: usize, src_start: usize, src_len: usize) -> usize {
    src_start + dst_pos * src_len / dst_len.max(1)
}

impl Scaler for SoftwareScaler {
    fn supports(&self, src: ImageFormat, dst: ImageFormat) -> bool {
        matches!(src, ImageFormat::Nv12 | ImageFormat::Yuv420p) && dst == ImageFormat::Nv12
    }

    fn reinit(&mut self, src: &ImageParams, dst: &ImageParams) -> Result<(), ScaleError> {
        if !self.supports(src.format, dst.format) {
            self.config = None;
            return Err(ScaleError::Unsupported {
                src: src.format,
                dst: dst.format,
            });
        }
        self.config = Some((*src, *dst));
        Ok(())
    }

    #[profiling::function]
    fn scale(&mut self, dst: &mut Image, src: &Image, src_rect: Rectangle) -> Result<(), ScaleError> {
        if self.config.is_none() {
            return Err(ScaleError::NotConfigured);
        }
        if !self.supports(src.format, dst.format) {
            return Err(ScaleError::Unsupported {
                src: src.format,
                dst: dst.format,
            });
        }
        let (align_x, align_y) = src.format.align();
        let mut rect = src_rect
            .intersection(&src.rect())
            .ok_or(ScaleError::EmptySource(src_rect))?;
        let aligned_x = crate::utils::align_down(rect.x, align_x);
        let aligned_y = crate::utils::align_down(rect.y, align_y);
        rect.width += rect.x - aligned_x;
        rect.height += rect.y - aligned_y;
        rect.x = aligned_x;
        rect.y = aligned_y;

        let (dw, dh) = (dst.width as usize, dst.height as usize);
        let (sx, sy, sw, sh) = (rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);

        let luma = &src.planes[0];
        let out = &mut dst.planes[0];
        for y in 0..dh {
            let src_line = sample(y, dh, sy, sh) * luma.stride;
            let dst_line = y * out.stride;
            for x in 0..dw {
                out.data[dst_line + x] = luma.data[src_line + sample(x, dw, sx, sw)];
            }
        }

        let (dcw, dch) = ((dw + 1) / 2, (dh + 1) / 2);
        let (scx, scy) = (sx / 2, sy / 2);
        let (scw, sch) = ((sw + 1) / 2, (sh + 1) / 2);
        let chroma_at = |x: usize, y: usize| -> (u8, u8) {
            match src.format {
                ImageFormat::Yuv420p => {
                    let (u, v) = (&src.planes[1], &src.planes[2]);
                    (u.data[y * u.stride + x], v.data[y * v.stride + x])
                }
                _ => {
                    let uv = &src.planes[1];
                    let offset = y * uv.stride + x * 2;
                    (uv.data[offset], uv.data[offset + 1])
                }
            }
        };
        let out = &mut dst.planes[1];
        for y in 0..dch {
            let src_y = sample(y, dch, scy, sch);
            let dst_line = y * out.stride;
            for x in 0..dcw {
                let (u, v) = chroma_at(sample(x, dcw, scx, scw), src_y);
                out.data[dst_line + x * 2] = u;
                out.data[dst_line + x * 2 + 1] = v;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> SoftwareScaler {
        let mut scaler = SoftwareScaler::new();
        scaler
            .reinit(
                &ImageParams::new(ImageFormat::Yuv420p, 4, 4),
                &ImageParams::new(ImageFormat::Nv12, 2, 2),
            )
            .unwrap();
        scaler
    }

    #[test]
    fn downscale_yuv420p() {
        let mut src = Image::new(ImageFormat::Yuv420p, 4, 4);
        src.planes[0].data = (0..16).collect();
        src.planes[1].data = vec![1, 2, 3, 4];
        src.planes[2].data = vec![5, 6, 7, 8];
        let mut dst = Image::new(ImageFormat::Nv12, 2, 2);
        let rect = src.rect();
        configured().scale(&mut dst, &src, rect).unwrap();
        assert_eq!(dst.planes[0].data, vec![0, 2, 8, 10]);
        assert_eq!(dst.planes[1].data, vec![1, 5]);
    }

    #[test]
    fn crop_origin_is_aligned() {
        let mut src = Image::new(ImageFormat::Nv12, 4, 4);
        src.planes[0].data = (0..16).collect();
        let mut dst = Image::new(ImageFormat::Nv12, 2, 2);
        configured()
            .scale(&mut dst, &src, Rectangle::new(3, 3, 1, 1))
            .unwrap();
        // the crop grows to (2, 2, 2, 2)
        assert_eq!(dst.planes[0].data, vec![10, 11, 14, 15]);
    }

    #[test]
    fn rejects_unconfigured_and_unsupported() {
        let src = Image::new(ImageFormat::Bgra, 2, 2);
        let mut dst = Image::new(ImageFormat::Nv12, 2, 2);
        let mut scaler = SoftwareScaler::new();
        assert_eq!(scaler.scale(&mut dst, &src, src.rect()), Err(ScaleError::NotConfigured));
        assert!(scaler
            .reinit(
                &ImageParams::new(ImageFormat::Bgra, 2, 2),
                &ImageParams::new(ImageFormat::Nv12, 2, 2)
            )
            .is_err());
        let mut scaler = configured();
        assert!(matches!(
            scaler.scale(&mut dst, &src, src.rect()),
            Err(ScaleError::Unsupported { .. })
        ));
    }
}
